//! Storage layer.
//!
//! A single `SQLite` file holds everything: insights, subjects and both
//! relation graphs, knowledge bases with their chunks, and the task/lock
//! state machine. Stores are async facades (`spawn_blocking`) over a
//! shared `Mutex<Connection>`; `SQLite` runs in WAL mode with a 5 second
//! busy timeout so readers proceed alongside a single writer.
//!
//! - [`Database`] — open/configure the file and run migrations
//! - [`InsightStore`] — insights, subjects, relations, knowledge bases
//! - [`TaskStore`] — tasks, dependencies, locks, events

mod connection;
mod insights;
mod kb;
pub mod migrations;
mod rows;
mod subjects;
mod tasks;

pub use connection::Database;
pub use insights::InsightStore;
pub use tasks::{TaskStore, normalize_resource};
