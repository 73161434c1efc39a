//! Task/lock state machine.
//!
//! Colocated with the insight store in the same database file but fully
//! disjoint in tables. Transitions are optimistic (CAS on `version`); the
//! dependency gate, the transition table, and lock non-overlap are
//! enforced by DB triggers (see migration 6), so they hold regardless of
//! which code path writes.

use crate::models::{
    TaskEventRecord, TaskLockRecord, TaskRecord, TaskState, TransitionRequest, TransitionResult,
};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::sync::{Arc, Mutex};
use tracing::instrument;
use uuid::Uuid;

use super::connection::{Database, with_connection};
use super::rows::{row_to_event, row_to_lock, row_to_task};

fn storage_err(operation: &str, e: &rusqlite::Error) -> Error {
    Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// Normalizes a lock resource path.
///
/// Strips surrounding whitespace, converts `\` to `/`, drops `.` segments
/// and redundant slashes, and removes the trailing slash unless the path
/// is exactly `/`.
#[must_use]
pub fn normalize_resource(raw: &str) -> String {
    let trimmed = raw.trim().replace('\\', "/");
    if trimmed.is_empty() {
        return String::new();
    }

    let absolute = trimmed.starts_with('/');
    let segments: Vec<&str> = trimmed
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();

    if segments.is_empty() {
        return if absolute { "/".to_string() } else { String::new() };
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Store for the task/lock state machine.
///
/// Cloning is cheap; clones share the underlying connection.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Creates a store over an opened [`Database`].
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Creates a task in state `todo` with `version = 0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `task_id` already exists.
    #[instrument(skip(self, title))]
    pub async fn create_task(
        &self,
        title: &str,
        owner: &str,
        task_id: Option<String>,
    ) -> Result<TaskRecord> {
        let title = title.to_string();
        let owner = owner.to_string();
        with_connection(&self.conn, "create_task", move |conn| {
            let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO tasks (task_id, title, status, owner, created_at, updated_at)
                 VALUES (?1, ?2, 'todo', ?3, ?4, ?4)",
                params![task_id, title, owner, now],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint failed") {
                    Error::InvalidInput(format!("task '{task_id}' already exists"))
                } else {
                    storage_err("create_task", &e)
                }
            })?;
            metrics::counter!("tasks_created_total").increment(1);
            conn.query_row(
                "SELECT * FROM tasks WHERE task_id = ?1",
                params![task_id],
                row_to_task,
            )
            .map_err(|e| storage_err("create_task", &e))
        })
        .await
    }

    /// Fetches a task by id.
    #[instrument(skip(self))]
    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let task_id = task_id.to_string();
        with_connection(&self.conn, "get_task", move |conn| {
            conn.query_row(
                "SELECT * FROM tasks WHERE task_id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()
            .map_err(|e| storage_err("get_task", &e))
        })
        .await
    }

    /// Lists tasks newest-first, optionally filtered by status.
    #[instrument(skip(self))]
    pub async fn list_tasks(
        &self,
        status: Option<TaskState>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>> {
        with_connection(&self.conn, "list_tasks", move |conn| {
            let tasks = if let Some(status) = status {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM tasks WHERE status = ?1
                         ORDER BY created_at DESC, task_id DESC LIMIT ?2",
                    )
                    .map_err(|e| storage_err("list_tasks", &e))?;
                stmt.query_map(params![status.as_str(), limit as i64], row_to_task)
                    .map_err(|e| storage_err("list_tasks", &e))?
                    .collect::<rusqlite::Result<Vec<_>>>()
            } else {
                let mut stmt = conn
                    .prepare("SELECT * FROM tasks ORDER BY created_at DESC, task_id DESC LIMIT ?1")
                    .map_err(|e| storage_err("list_tasks", &e))?;
                stmt.query_map(params![limit as i64], row_to_task)
                    .map_err(|e| storage_err("list_tasks", &e))?
                    .collect::<rusqlite::Result<Vec<_>>>()
            }
            .map_err(|e| storage_err("list_tasks", &e))?;
            Ok(tasks)
        })
        .await
    }

    /// Records dependency edges; duplicates and empty ids are ignored.
    #[instrument(skip(self, depends_on))]
    pub async fn add_dependencies(&self, task_id: &str, depends_on: Vec<String>) -> Result<()> {
        let task_id = task_id.to_string();
        with_connection(&self.conn, "add_dependencies", move |conn| {
            for dep_id in depends_on.iter().filter(|d| !d.is_empty()) {
                conn.execute(
                    "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id)
                     VALUES (?1, ?2)",
                    params![task_id, dep_id],
                )
                .map_err(|e| storage_err("add_dependencies", &e))?;
            }
            Ok(())
        })
        .await
    }

    /// Assigns active locks on the given resources to a task.
    ///
    /// Resources are normalized first; empty ones are skipped. Returns
    /// the ids of the created locks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] when a resource equals or
    /// path-prefix-overlaps an active lock held by a different task (the
    /// DB trigger and partial unique index enforce this).
    #[instrument(skip(self, resources))]
    pub async fn assign_locks(&self, task_id: &str, resources: Vec<String>) -> Result<Vec<String>> {
        let task_id = task_id.to_string();
        with_connection(&self.conn, "assign_locks", move |conn| {
            let now = Utc::now().to_rfc3339();
            let mut lock_ids = Vec::new();
            for raw in &resources {
                let resource = normalize_resource(raw);
                if resource.is_empty() {
                    continue;
                }
                let lock_id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO task_locks (id, task_id, resource, active, created_at)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![lock_id, task_id, resource, now],
                )
                .map_err(|e| {
                    let cause = e.to_string();
                    if cause.contains("lock overlap") || cause.contains("UNIQUE constraint failed")
                    {
                        metrics::counter!("task_lock_conflicts_total").increment(1);
                        Error::LockConflict { resource, cause }
                    } else {
                        storage_err("assign_locks", &e)
                    }
                })?;
                lock_ids.push(lock_id);
            }
            Ok(lock_ids)
        })
        .await
    }

    /// Releases all locks held by a task with a single UPDATE. Returns
    /// the number of locks released.
    #[instrument(skip(self))]
    pub async fn release_locks(&self, task_id: &str) -> Result<usize> {
        let task_id = task_id.to_string();
        with_connection(&self.conn, "release_locks", move |conn| {
            conn.execute(
                "UPDATE task_locks SET active = 0 WHERE task_id = ?1 AND active = 1",
                params![task_id],
            )
            .map_err(|e| storage_err("release_locks", &e))
        })
        .await
    }

    /// Lists locks held by a task (active and historical).
    #[instrument(skip(self))]
    pub async fn list_locks(&self, task_id: &str) -> Result<Vec<TaskLockRecord>> {
        let task_id = task_id.to_string();
        with_connection(&self.conn, "list_locks", move |conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM task_locks WHERE task_id = ?1 ORDER BY created_at")
                .map_err(|e| storage_err("list_locks", &e))?;
            let locks = stmt
                .query_map(params![task_id], row_to_lock)
                .map_err(|e| storage_err("list_locks", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("list_locks", &e))?;
            Ok(locks)
        })
        .await
    }

    /// Appends one event row. Events are immutable once written.
    #[instrument(skip(self, payload))]
    pub async fn append_event(
        &self,
        task_id: &str,
        event_type: &str,
        actor: &str,
        payload: serde_json::Value,
    ) -> Result<TaskEventRecord> {
        let task_id = task_id.to_string();
        let event_type = event_type.to_string();
        let actor = actor.to_string();
        with_connection(&self.conn, "append_event", move |conn| {
            let event_id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO task_events (id, task_id, event_type, actor, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![event_id, task_id, event_type, actor, payload.to_string(), now],
            )
            .map_err(|e| storage_err("append_event", &e))?;
            conn.query_row(
                "SELECT * FROM task_events WHERE id = ?1",
                params![event_id],
                row_to_event,
            )
            .map_err(|e| storage_err("append_event", &e))
        })
        .await
    }

    /// Lists a task's events, newest-first. Within the same timestamp the
    /// order is given by event id.
    #[instrument(skip(self))]
    pub async fn list_events(&self, task_id: &str, limit: usize) -> Result<Vec<TaskEventRecord>> {
        let task_id = task_id.to_string();
        with_connection(&self.conn, "list_events", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM task_events WHERE task_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )
                .map_err(|e| storage_err("list_events", &e))?;
            let events = stmt
                .query_map(params![task_id, limit as i64], row_to_event)
                .map_err(|e| storage_err("list_events", &e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| storage_err("list_events", &e))?;
            Ok(events)
        })
        .await
    }

    /// Executes one atomic state transition.
    ///
    /// The CAS update and the `state_transition` event append run in the
    /// same IMMEDIATE transaction; either both land or neither does.
    /// `retry_count` increments on entry to `blocked`; `version`
    /// increments by exactly one on every successful transition.
    ///
    /// # Errors
    ///
    /// - [`Error::TaskNotFound`] — no row for `task_id`
    /// - [`Error::ConcurrencyConflict`] — version guard failed
    /// - [`Error::InvalidTransition`] — status mismatch or a `(from, to)`
    ///   pair outside the state machine
    /// - [`Error::DependencyNotMet`] — entering `in_progress` with a
    ///   non-`done` dependency
    #[instrument(skip(self, request), fields(task_id = %request.task_id))]
    pub async fn transition(&self, request: TransitionRequest) -> Result<TransitionResult> {
        with_connection(&self.conn, "transition", move |conn| {
            transition_sync(conn, &request)
        })
        .await
    }
}

fn classify_trigger_error(request: &TransitionRequest, e: &rusqlite::Error) -> Error {
    let cause = e.to_string();
    if cause.contains("task dependencies not complete") {
        metrics::counter!("task_dependency_rejections_total").increment(1);
        Error::DependencyNotMet {
            task_id: request.task_id.clone(),
        }
    } else if cause.contains("invalid task state transition") {
        Error::InvalidTransition {
            task_id: request.task_id.clone(),
            reason: format!(
                "{} -> {} is not allowed",
                request.from_state, request.to_state
            ),
        }
    } else {
        storage_err("transition", e)
    }
}

fn transition_sync(conn: &mut Connection, request: &TransitionRequest) -> Result<TransitionResult> {
    let now = Utc::now().to_rfc3339();

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| storage_err("transition_begin", &e))?;

    let updated = tx
        .execute(
            "UPDATE tasks
             SET status = ?1,
                 retry_count = retry_count + CASE WHEN ?1 = 'blocked' THEN 1 ELSE 0 END,
                 version = version + 1,
                 updated_at = ?2
             WHERE task_id = ?3 AND status = ?4 AND version = ?5",
            params![
                request.to_state.as_str(),
                now,
                request.task_id,
                request.from_state.as_str(),
                request.expected_version,
            ],
        )
        .map_err(|e| classify_trigger_error(request, &e))?;

    if updated != 1 {
        // Re-read to distinguish the reason; the transaction rolls back on drop
        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT status, version FROM tasks WHERE task_id = ?1",
                params![request.task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| storage_err("transition_reread", &e))?;

        return Err(match current {
            None => Error::TaskNotFound {
                task_id: request.task_id.clone(),
            },
            Some((_, version)) if version != request.expected_version => {
                metrics::counter!("task_concurrency_conflicts_total").increment(1);
                Error::ConcurrencyConflict {
                    task_id: request.task_id.clone(),
                    expected: request.expected_version,
                    found: version,
                }
            },
            Some((status, _)) => Error::InvalidTransition {
                task_id: request.task_id.clone(),
                reason: format!("expected {}, found {status}", request.from_state),
            },
        });
    }

    let event_id = Uuid::new_v4().to_string();
    let payload = serde_json::json!({
        "from_state": request.from_state.as_str(),
        "to_state": request.to_state.as_str(),
        "reason": request.reason,
        "evidence": request.evidence,
    });
    tx.execute(
        "INSERT INTO task_events (id, task_id, event_type, actor, payload, created_at)
         VALUES (?1, ?2, 'state_transition', ?3, ?4, ?5)",
        params![
            event_id,
            request.task_id,
            request.actor,
            payload.to_string(),
            now
        ],
    )
    .map_err(|e| storage_err("transition_event", &e))?;

    let task = tx
        .query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![request.task_id],
            row_to_task,
        )
        .map_err(|e| storage_err("transition_reread", &e))?;

    tx.commit()
        .map_err(|e| storage_err("transition_commit", &e))?;

    metrics::counter!("task_transitions_total").increment(1);
    Ok(TransitionResult { task, event_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("src/api/", "src/api"; "trailing slash stripped")]
    #[test_case("  src/api ", "src/api"; "whitespace stripped")]
    #[test_case("src\\api\\handler.py", "src/api/handler.py"; "backslashes converted")]
    #[test_case("./src/./api", "src/api"; "dot segments collapsed")]
    #[test_case("src//api///handler.py", "src/api/handler.py"; "redundant slashes collapsed")]
    #[test_case("/", "/"; "root stays root")]
    #[test_case("/src/", "/src"; "absolute trailing slash stripped")]
    #[test_case("", ""; "empty stays empty")]
    #[test_case("   ", ""; "blank stays empty")]
    fn test_normalize_resource(input: &str, expected: &str) {
        assert_eq!(normalize_resource(input), expected);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in "[a-z./\\\\ ]{0,24}") {
            let once = normalize_resource(&raw);
            prop_assert_eq!(normalize_resource(&once), once);
        }

        #[test]
        fn prop_normalized_has_no_doubled_slash(raw in "[a-z./\\\\]{0,24}") {
            let normalized = normalize_resource(&raw);
            prop_assert!(!normalized.contains("//"));
            prop_assert!(!normalized.contains('\\'));
        }
    }
}
