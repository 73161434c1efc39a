//! Schema migrations.
//!
//! The runner owns the `schema_versions` table. On open it ensures the
//! base tables exist (safe to re-run), reads `MAX(version)` (empty as 0),
//! and applies each registered migration with a higher version inside its
//! own transaction together with the `schema_versions` record. A failing
//! migration rolls back completely; the recorded version never advances
//! partially and the next open retries the same migration.
//!
//! Every migration body is idempotent on a fresh database
//! (check-and-create patterns) and data-preserving on existing rows.

use crate::models::SubjectKind;
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, Transaction, params};

use super::subjects;

/// Base tables, created unconditionally before migrations run.
const BOOTSTRAP_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS insights (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    normalized_text TEXT NOT NULL,
    frame TEXT NOT NULL,
    domains TEXT NOT NULL DEFAULT '[]',
    entities TEXT NOT NULL DEFAULT '[]',
    problems TEXT NOT NULL DEFAULT '[]',
    resolutions TEXT NOT NULL DEFAULT '[]',
    contexts TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 1.0,
    source TEXT NOT NULL DEFAULT '',
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_insights_frame ON insights(frame);

CREATE TABLE IF NOT EXISTS schema_versions (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
);
";

/// A single registered migration.
#[derive(Clone, Copy)]
pub struct Migration {
    /// Migration version (sequential, starting at 1).
    pub version: i64,
    /// Migration body; returns the description recorded alongside the
    /// version on success.
    pub apply: fn(&Transaction<'_>) -> Result<&'static str>,
}

/// All registered migrations, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        apply: migrate_001_subject_index,
    },
    Migration {
        version: 2,
        apply: migrate_002_extraction_columns,
    },
    Migration {
        version: 3,
        apply: migrate_003_insight_relations,
    },
    Migration {
        version: 4,
        apply: migrate_004_subject_relations,
    },
    Migration {
        version: 5,
        apply: migrate_005_knowledge_bases,
    },
    Migration {
        version: 6,
        apply: migrate_006_task_state_machine,
    },
];

fn storage_err(operation: &str, e: &rusqlite::Error) -> Error {
    Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// Returns the highest applied schema version (0 when none).
pub fn current_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_versions",
        [],
        |row| row.get(0),
    )
    .map_err(|e| storage_err("read_schema_version", &e))
}

/// Ensures base tables exist and applies all pending migrations.
pub fn run_pending(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(BOOTSTRAP_SCHEMA)
        .map_err(|e| storage_err("bootstrap_schema", &e))?;

    let current = current_version(conn)?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| storage_err("migration_begin", &e))?;
        let description = (migration.apply)(&tx)?;
        tx.execute(
            "INSERT INTO schema_versions (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![migration.version, Utc::now().to_rfc3339(), description],
        )
        .map_err(|e| storage_err("record_migration", &e))?;
        tx.commit()
            .map_err(|e| storage_err("migration_commit", &e))?;

        tracing::info!(
            version = migration.version,
            description,
            "Applied migration"
        );
    }

    Ok(())
}

/// Migration 1: subjects + insight_subjects, backfilled from the
/// domain/entity tags of existing insights.
fn migrate_001_subject_index(tx: &Transaction<'_>) -> Result<&'static str> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subjects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(name, kind)
        );
        CREATE INDEX IF NOT EXISTS idx_subjects_name ON subjects(name);
        CREATE INDEX IF NOT EXISTS idx_subjects_kind ON subjects(kind);

        CREATE TABLE IF NOT EXISTS insight_subjects (
            insight_id TEXT NOT NULL REFERENCES insights(id) ON DELETE CASCADE,
            subject_id TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            PRIMARY KEY (insight_id, subject_id)
        );
        CREATE INDEX IF NOT EXISTS idx_insight_subjects_subject ON insight_subjects(subject_id);
        ",
    )
    .map_err(|e| storage_err("migration_001_tables", &e))?;

    // Backfill from existing insights
    let rows: Vec<(String, String, String)> = {
        let mut stmt = tx
            .prepare("SELECT id, domains, entities FROM insights")
            .map_err(|e| storage_err("migration_001_scan", &e))?;
        let mapped = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(|e| storage_err("migration_001_scan", &e))?;
        mapped
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| storage_err("migration_001_scan", &e))?
    };

    let now = Utc::now().to_rfc3339();
    for (insight_id, domains, entities) in rows {
        let domains: Vec<String> = serde_json::from_str(&domains).unwrap_or_default();
        let entities: Vec<String> = serde_json::from_str(&entities).unwrap_or_default();
        subjects::upsert_tag_subjects(
            tx,
            "INSERT OR IGNORE INTO insight_subjects (insight_id, subject_id) VALUES (?1, ?2)",
            &insight_id,
            &[
                (SubjectKind::Domain, &domains),
                (SubjectKind::Entity, &entities),
            ],
            &now,
        )?;
    }

    Ok("Add subjects table and insight_subjects join table with backfill")
}

/// Migration 2: problems/resolutions/contexts columns with safe defaults.
/// Fresh databases already carry them in the bootstrap schema, so each is
/// check-and-add.
fn migrate_002_extraction_columns(tx: &Transaction<'_>) -> Result<&'static str> {
    let columns: Vec<String> = {
        let mut stmt = tx
            .prepare("PRAGMA table_info(insights)")
            .map_err(|e| storage_err("migration_002_table_info", &e))?;
        let mapped = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| storage_err("migration_002_table_info", &e))?;
        mapped
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| storage_err("migration_002_table_info", &e))?
    };

    for column in ["problems", "resolutions", "contexts"] {
        if !columns.iter().any(|c| c == column) {
            tx.execute_batch(&format!(
                "ALTER TABLE insights ADD COLUMN {column} TEXT NOT NULL DEFAULT '[]'"
            ))
            .map_err(|e| storage_err("migration_002_add_column", &e))?;
        }
    }

    Ok("Add problems, resolutions, contexts columns to insights")
}

/// Migration 3: insight_relations with a shared-subject backfill. Any
/// pair of insights sharing >= 1 subject gains one `shared_subject` row
/// with `weight = shared_count`, stored canonically with `from_id < to_id`.
fn migrate_003_insight_relations(tx: &Transaction<'_>) -> Result<&'static str> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS insight_relations (
            from_id TEXT NOT NULL REFERENCES insights(id) ON DELETE CASCADE,
            to_id TEXT NOT NULL REFERENCES insights(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (from_id, to_id, relation_type)
        );
        CREATE INDEX IF NOT EXISTS idx_relations_from ON insight_relations(from_id);
        CREATE INDEX IF NOT EXISTS idx_relations_to ON insight_relations(to_id);
        ",
    )
    .map_err(|e| storage_err("migration_003_tables", &e))?;

    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT OR IGNORE INTO insight_relations (from_id, to_id, relation_type, weight, created_at)
         SELECT a.insight_id, b.insight_id, 'shared_subject', CAST(COUNT(*) AS REAL), ?1
         FROM insight_subjects a
         JOIN insight_subjects b
           ON a.subject_id = b.subject_id AND a.insight_id < b.insight_id
         GROUP BY a.insight_id, b.insight_id
         HAVING COUNT(*) >= 1",
        params![now],
    )
    .map_err(|e| storage_err("migration_003_backfill", &e))?;

    Ok("Add insight_relations table with shared-subject backfill")
}

/// Migration 4: subject_relations for the subject hierarchy.
fn migrate_004_subject_relations(tx: &Transaction<'_>) -> Result<&'static str> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subject_relations (
            from_subject_id TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            to_subject_id TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (from_subject_id, to_subject_id, relation_type)
        );
        CREATE INDEX IF NOT EXISTS idx_subrel_from ON subject_relations(from_subject_id);
        CREATE INDEX IF NOT EXISTS idx_subrel_to ON subject_relations(to_subject_id);
        CREATE INDEX IF NOT EXISTS idx_subrel_type ON subject_relations(relation_type);
        ",
    )
    .map_err(|e| storage_err("migration_004_tables", &e))?;

    Ok("Add subject_relations table for subject hierarchy")
}

/// Migration 5: knowledge bases, chunks, chunk subjects, and
/// chunk↔insight relations.
fn migrate_005_knowledge_bases(tx: &Transaction<'_>) -> Result<&'static str> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            source_type TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_kb_name ON knowledge_bases(name);

        CREATE TABLE IF NOT EXISTS kb_chunks (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL REFERENCES knowledge_bases(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            normalized_text TEXT NOT NULL,
            frame TEXT NOT NULL,
            domains TEXT NOT NULL DEFAULT '[]',
            entities TEXT NOT NULL DEFAULT '[]',
            problems TEXT NOT NULL DEFAULT '[]',
            resolutions TEXT NOT NULL DEFAULT '[]',
            contexts TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL DEFAULT 1.0,
            source_url TEXT NOT NULL DEFAULT '',
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_kb_chunks_kb_id ON kb_chunks(kb_id);
        CREATE INDEX IF NOT EXISTS idx_kb_chunks_frame ON kb_chunks(frame);
        CREATE INDEX IF NOT EXISTS idx_kb_chunks_source_url ON kb_chunks(source_url);

        CREATE TABLE IF NOT EXISTS kb_chunk_subjects (
            kb_chunk_id TEXT NOT NULL REFERENCES kb_chunks(id) ON DELETE CASCADE,
            subject_id TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            PRIMARY KEY (kb_chunk_id, subject_id)
        );
        CREATE INDEX IF NOT EXISTS idx_kb_chunk_subjects_subject ON kb_chunk_subjects(subject_id);

        CREATE TABLE IF NOT EXISTS kb_insight_relations (
            kb_chunk_id TEXT NOT NULL REFERENCES kb_chunks(id) ON DELETE CASCADE,
            insight_id TEXT NOT NULL REFERENCES insights(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (kb_chunk_id, insight_id, relation_type)
        );
        CREATE INDEX IF NOT EXISTS idx_kb_insight_rel_chunk ON kb_insight_relations(kb_chunk_id);
        CREATE INDEX IF NOT EXISTS idx_kb_insight_rel_insight ON kb_insight_relations(insight_id);
        CREATE INDEX IF NOT EXISTS idx_kb_insight_rel_type ON kb_insight_relations(relation_type);
        ",
    )
    .map_err(|e| storage_err("migration_005_tables", &e))?;

    Ok("Add knowledge_bases, kb_chunks, kb_chunk_subjects, kb_insight_relations tables")
}

/// Migration 6: task state machine tables with DB-enforced invariants.
///
/// Three classes of triggers guard the invariants regardless of which
/// code path writes:
/// - lock inserts abort when an active lock of a different task equals or
///   path-prefix-overlaps the new resource (`substr` comparison, so `%`
///   and `_` in paths are inert);
/// - status updates abort outside the closed transition table, and abort
///   on entry to `in_progress` while any dependency is not `done`;
/// - `task_events` rows can never be updated or deleted.
fn migrate_006_task_state_machine(tx: &Transaction<'_>) -> Result<&'static str> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'todo',
            owner TEXT NOT NULL DEFAULT '',
            retry_count INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);

        CREATE TABLE IF NOT EXISTS task_locks (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            resource TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_task_locks_task ON task_locks(task_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_task_locks_active_resource
            ON task_locks(resource) WHERE active = 1;

        CREATE TABLE IF NOT EXISTS task_dependencies (
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            depends_on_task_id TEXT NOT NULL,
            PRIMARY KEY (task_id, depends_on_task_id)
        );

        CREATE TABLE IF NOT EXISTS task_events (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            actor TEXT NOT NULL DEFAULT '',
            payload TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id);

        CREATE TRIGGER IF NOT EXISTS trg_task_locks_no_overlap
        BEFORE INSERT ON task_locks
        FOR EACH ROW WHEN NEW.active = 1
        BEGIN
            SELECT RAISE(ABORT, 'lock overlap: resource conflicts with active lock')
            WHERE EXISTS (
                SELECT 1 FROM task_locks
                WHERE active = 1
                  AND task_id != NEW.task_id
                  AND (resource = NEW.resource
                       OR substr(resource, 1, length(NEW.resource) + 1) = NEW.resource || '/'
                       OR substr(NEW.resource, 1, length(resource) + 1) = resource || '/')
            );
        END;

        CREATE TRIGGER IF NOT EXISTS trg_tasks_valid_transition
        BEFORE UPDATE OF status ON tasks
        FOR EACH ROW WHEN OLD.status != NEW.status
        BEGIN
            SELECT RAISE(ABORT, 'invalid task state transition')
            WHERE NOT (
                (OLD.status = 'todo' AND NEW.status IN ('in_progress', 'canceled'))
                OR (OLD.status = 'in_progress'
                    AND NEW.status IN ('done', 'failed', 'blocked', 'canceled'))
                OR (OLD.status = 'blocked' AND NEW.status IN ('todo', 'canceled'))
                OR (OLD.status = 'failed' AND NEW.status IN ('todo', 'canceled'))
            );
        END;

        CREATE TRIGGER IF NOT EXISTS trg_tasks_dependency_gate
        BEFORE UPDATE OF status ON tasks
        FOR EACH ROW WHEN NEW.status = 'in_progress' AND OLD.status != 'in_progress'
        BEGIN
            SELECT RAISE(ABORT, 'task dependencies not complete')
            WHERE EXISTS (
                SELECT 1 FROM task_dependencies d
                LEFT JOIN tasks t ON t.task_id = d.depends_on_task_id
                WHERE d.task_id = NEW.task_id
                  AND (t.status IS NULL OR t.status != 'done')
            );
        END;

        CREATE TRIGGER IF NOT EXISTS trg_task_events_no_update
        BEFORE UPDATE ON task_events
        BEGIN
            SELECT RAISE(ABORT, 'task events are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_task_events_no_delete
        BEFORE DELETE ON task_events
        BEGIN
            SELECT RAISE(ABORT, 'task events are append-only');
        END;
        ",
    )
    .map_err(|e| storage_err("migration_006_tables", &e))?;

    Ok("Add tasks, task_locks, task_dependencies, task_events with state-machine triggers")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::configure_connection;

    fn open_migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn);
        run_pending(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = open_migrated();
        let version = current_version(&conn).unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = open_migrated();
        run_pending(&mut conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_versions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i64 + 1);
        }
    }

    #[test]
    fn test_subject_backfill_from_existing_tags() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn);
        // Seed a pre-migration insight row, then migrate
        conn.execute_batch(BOOTSTRAP_SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO insights (id, text, normalized_text, frame, domains, entities, created_at, updated_at)
             VALUES ('i1', 't', 'n', 'causal', '[\"Node\"]', '[\"jwt\"]', '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();

        run_pending(&mut conn).unwrap();

        let subject_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM subjects", [], |r| r.get(0))
            .unwrap();
        assert_eq!(subject_count, 2);
        // Backfilled names are normalized
        let name: String = conn
            .query_row(
                "SELECT name FROM subjects WHERE kind = 'domain'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(name, "node");

        let membership_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM insight_subjects", [], |r| r.get(0))
            .unwrap();
        assert_eq!(membership_count, 2);
    }

    #[test]
    fn test_shared_subject_backfill() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn);
        conn.execute_batch(BOOTSTRAP_SCHEMA).unwrap();
        for id in ["a1", "b2"] {
            conn.execute(
                "INSERT INTO insights (id, text, normalized_text, frame, domains, entities, created_at, updated_at)
                 VALUES (?1, 't', 'n', 'causal', '[\"auth\"]', '[\"jwt\"]', '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')",
                params![id],
            )
            .unwrap();
        }

        run_pending(&mut conn).unwrap();

        let (from_id, to_id, weight): (String, String, f64) = conn
            .query_row(
                "SELECT from_id, to_id, weight FROM insight_relations WHERE relation_type = 'shared_subject'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert!(from_id < to_id);
        assert!((weight - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_task_events_are_append_only() {
        let conn = open_migrated();
        conn.execute(
            "INSERT INTO tasks (task_id, title, created_at, updated_at)
             VALUES ('t1', 'x', '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO task_events (id, task_id, event_type, created_at)
             VALUES ('e1', 't1', 'created', '2024-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();

        let update = conn.execute("UPDATE task_events SET actor = 'x' WHERE id = 'e1'", []);
        assert!(update.is_err());
        let delete = conn.execute("DELETE FROM task_events WHERE id = 'e1'", []);
        assert!(delete.is_err());
    }
}
