//! # Semantic Memory
//!
//! A local, persistent semantic memory engine.
//!
//! Free-form text is decomposed into atomic insights, classified into a
//! small set of semantic frames, tagged with structured subjects, embedded
//! as unit vectors, and stored in a single `SQLite` file. Retrieval works
//! by meaning (vector similarity), by subject tag, and by one-hop traversal
//! of the subject relation graph.
//!
//! ## Architecture
//!
//! - Migration runner with versioned, idempotent schema migrations
//! - Insight and knowledge-base stores maintaining a bipartite
//!   insight↔subject graph and a directed subject↔subject relation graph
//! - LLM-driven normalizer (decompose + classify + confidence scoring)
//! - Embedding providers (`OpenAI`, Bedrock Titan) with unit normalization
//! - Markdown ingestion pipeline (clean → chunk → normalize → batch embed)
//! - Colocated task/lock state machine with optimistic concurrency
//!
//! ## Example
//!
//! ```rust,ignore
//! use semantic_memory::{MemoryConfig, MemoryService};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = MemoryConfig::from_env()?;
//! let service = MemoryService::from_config(&config).await?;
//! let outcome = service
//!     .store_insight(request, &CancellationToken::new())
//!     .await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod rendering;
pub mod service;
pub mod storage;

// Re-exports for convenience
pub use config::{EmbeddingProviderKind, LlmProviderKind, MemoryConfig};
pub use embedding::Embedder;
pub use ingest::{CrawlService, Ingestor};
pub use llm::LlmProvider;
pub use models::{
    Frame, GitContext, Insight, InsightUpdate, KbChunk, KbSourceType, KnowledgeBase, SearchResult,
    Subject, SubjectKind, SubjectRelationEdge, SubjectRelationType, TaskRecord, TaskState,
};
pub use normalize::Normalizer;
pub use service::MemoryService;
pub use storage::{InsightStore, TaskStore};

/// Error type for semantic-memory operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait
/// implementations. Every variant maps to a stable code string via
/// [`Error::code`]; [`Error::to_report`] renders the `{code, reason,
/// details?}` object spoken by the external validator protocol.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotFound` | Missing insight/KB/subject id or name on lookup |
/// | `InvalidField` | Update request names a field outside the allowlist |
/// | `InvalidInput` | Malformed caller input (confidence out of range, empty required parameter, unparseable env value) |
/// | `Storage` | `SQLite` operations fail |
/// | `Provider` | LLM, embedding, or crawler calls fail |
/// | `TaskNotFound` | Transition targets a task id with no row |
/// | `InvalidTransition` | `(from, to)` pair outside the state machine, or CAS status mismatch |
/// | `DependencyNotMet` | Entry to `in_progress` with a non-`done` dependency |
/// | `LockConflict` | Active lock insert overlaps another task's active lock |
/// | `ConcurrencyConflict` | CAS version guard failed |
/// | `Cancelled` | A cancellation token fired during a provider call |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A referenced row does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing row (e.g. `insight 3f2a…`).
        what: String,
    },

    /// An update named a field outside the allowlist.
    #[error("invalid field for update: {field}")]
    InvalidField {
        /// The rejected field name.
        field: String,
    },

    /// Invalid input was provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A storage operation failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An outbound provider call (LLM, embedding, crawler) failed.
    #[error("provider '{provider}' failed: {cause}")]
    Provider {
        /// The provider name (e.g. `anthropic`, `openai`, `bedrock`).
        provider: String,
        /// The underlying cause.
        cause: String,
    },

    /// A task transition referenced a task that does not exist.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The missing task id.
        task_id: String,
    },

    /// A state transition violated the task state machine.
    #[error("invalid task state transition for {task_id}: {reason}")]
    InvalidTransition {
        /// The task id.
        task_id: String,
        /// What was expected versus found.
        reason: String,
    },

    /// A task entered `in_progress` with incomplete dependencies.
    #[error("task dependencies not complete for {task_id}")]
    DependencyNotMet {
        /// The task id.
        task_id: String,
    },

    /// A resource lock overlapped another task's active lock.
    #[error("lock conflict on resource '{resource}': {cause}")]
    LockConflict {
        /// The requested resource path.
        resource: String,
        /// The underlying cause.
        cause: String,
    },

    /// An optimistic concurrency check failed.
    #[error("concurrency conflict for {task_id}: expected version {expected}, found {found}")]
    ConcurrencyConflict {
        /// The task id.
        task_id: String,
        /// The version the caller expected.
        expected: i64,
        /// The version actually present.
        found: i64,
    },

    /// The operation was cancelled via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the stable code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidField { .. } => "INVALID_FIELD",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::DependencyNotMet { .. } => "DEPENDENCY_NOT_MET",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Renders this error as the `{code, reason, details?}` JSON object
    /// consumed by validator hooks and programmatic callers.
    #[must_use]
    pub fn to_report(&self) -> serde_json::Value {
        let mut report = serde_json::json!({
            "code": self.code(),
            "reason": self.to_string(),
        });
        let details = match self {
            Self::InvalidField { field } => Some(serde_json::json!({ "field": field })),
            Self::LockConflict { resource, .. } => {
                Some(serde_json::json!({ "resource": resource }))
            },
            Self::ConcurrencyConflict {
                task_id,
                expected,
                found,
            } => Some(serde_json::json!({
                "task_id": task_id,
                "expected_version": expected,
                "found_version": found,
            })),
            _ => None,
        };
        if let (Some(obj), Some(details)) = (report.as_object_mut(), details) {
            obj.insert("details".to_string(), details);
        }
        report
    }
}

/// Result type alias for semantic-memory operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("confidence out of range".to_string());
        assert_eq!(err.to_string(), "invalid input: confidence out of range");

        let err = Error::Storage {
            operation: "insert_insight".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "storage operation 'insert_insight' failed: disk full"
        );

        let err = Error::LockConflict {
            resource: "src/api".to_string(),
            cause: "overlaps active lock".to_string(),
        };
        assert!(err.to_string().contains("src/api"));
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            Error::NotFound {
                what: "x".to_string()
            }
            .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            Error::DependencyNotMet {
                task_id: "t".to_string()
            }
            .code(),
            "DEPENDENCY_NOT_MET"
        );
        assert_eq!(
            Error::ConcurrencyConflict {
                task_id: "t".to_string(),
                expected: 0,
                found: 1,
            }
            .code(),
            "CONCURRENCY_CONFLICT"
        );
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_to_report_carries_details() {
        let err = Error::ConcurrencyConflict {
            task_id: "task-1".to_string(),
            expected: 0,
            found: 2,
        };
        let report = err.to_report();
        assert_eq!(report["code"], "CONCURRENCY_CONFLICT");
        assert_eq!(report["details"]["expected_version"], 0);
        assert_eq!(report["details"]["found_version"], 2);

        let err = Error::Cancelled;
        assert!(err.to_report().get("details").is_none());
    }
}
