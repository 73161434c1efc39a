//! Task state machine types.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states for orchestrated multi-agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet started.
    #[default]
    Todo,
    /// Actively being worked.
    InProgress,
    /// Waiting on something outside the task.
    Blocked,
    /// Finished successfully (terminal).
    Done,
    /// Finished unsuccessfully; retryable.
    Failed,
    /// Abandoned (terminal).
    Canceled,
}

impl TaskState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a state from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(Error::InvalidInput(format!("unknown task state: {other}"))),
        }
    }

    /// Whether a transition from `self` to `to` is allowed by the state
    /// machine. Mirrors the DB-level trigger; checked in Rust only for
    /// early caller feedback.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (*self, to),
            (Self::Todo, Self::InProgress | Self::Canceled)
                | (
                    Self::InProgress,
                    Self::Done | Self::Failed | Self::Blocked | Self::Canceled
                )
                | (Self::Blocked | Self::Failed, Self::Todo | Self::Canceled)
        )
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub task_id: String,
    /// Human-readable title.
    pub title: String,
    /// Current state.
    pub status: TaskState,
    /// Owning agent (free-form).
    pub owner: String,
    /// Number of entries into `blocked`.
    pub retry_count: i64,
    /// Optimistic-concurrency version; increments on every transition.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Active or historical lock held by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLockRecord {
    /// Lock id.
    pub id: String,
    /// Owning task.
    pub task_id: String,
    /// Normalized resource path.
    pub resource: String,
    /// Whether the lock is currently held.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Dependency edge from a task to another task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependencyRecord {
    /// Depending task.
    pub task_id: String,
    /// Task that must be `done` first.
    pub depends_on_task_id: String,
}

/// Append-only task audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEventRecord {
    /// Event id.
    pub id: String,
    /// Task the event belongs to.
    pub task_id: String,
    /// Event type (e.g. `state_transition`).
    pub event_type: String,
    /// Acting agent.
    pub actor: String,
    /// Machine-readable payload.
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Transition request with optimistic concurrency guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Task to transition.
    pub task_id: String,
    /// Expected current state.
    pub from_state: TaskState,
    /// Target state.
    pub to_state: TaskState,
    /// Acting agent.
    pub actor: String,
    /// Free-form reason recorded in the event payload.
    #[serde(default)]
    pub reason: String,
    /// Free-form evidence recorded in the event payload.
    #[serde(default)]
    pub evidence: String,
    /// Expected current version.
    pub expected_version: i64,
}

/// Result of a successful state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    /// The task row after the transition.
    pub task: TaskRecord,
    /// Id of the `state_transition` event written alongside.
    pub event_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_state_round_trip() {
        for state in [
            TaskState::Todo,
            TaskState::InProgress,
            TaskState::Blocked,
            TaskState::Done,
            TaskState::Failed,
            TaskState::Canceled,
        ] {
            assert_eq!(TaskState::parse(state.as_str()).ok(), Some(state));
        }
        assert!(TaskState::parse("paused").is_err());
    }

    #[test_case(TaskState::Todo, TaskState::InProgress, true)]
    #[test_case(TaskState::Todo, TaskState::Canceled, true)]
    #[test_case(TaskState::Todo, TaskState::Done, false)]
    #[test_case(TaskState::InProgress, TaskState::Done, true)]
    #[test_case(TaskState::InProgress, TaskState::Failed, true)]
    #[test_case(TaskState::InProgress, TaskState::Blocked, true)]
    #[test_case(TaskState::InProgress, TaskState::Todo, false)]
    #[test_case(TaskState::Blocked, TaskState::Todo, true)]
    #[test_case(TaskState::Blocked, TaskState::Done, false)]
    #[test_case(TaskState::Failed, TaskState::Todo, true)]
    #[test_case(TaskState::Failed, TaskState::InProgress, false)]
    #[test_case(TaskState::Done, TaskState::Todo, false)]
    #[test_case(TaskState::Canceled, TaskState::Todo, false)]
    fn test_transition_table(from: TaskState, to: TaskState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::Failed.is_terminal());
    }
}
