//! Data models for semantic memory.
//!
//! This module contains all the core data structures used throughout the system.

mod insight;
mod kb;
mod task;

pub use insight::{
    Frame, GitContext, Insight, InsightUpdate, SearchResult, Subject, SubjectKind,
    SubjectRelationEdge, SubjectRelationType,
};
pub use kb::{CrawledPage, KbChunk, KbSourceType, KnowledgeBase};
pub use task::{
    TaskDependencyRecord, TaskEventRecord, TaskLockRecord, TaskRecord, TaskState,
    TransitionRequest, TransitionResult,
};
