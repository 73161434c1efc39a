//! Shared `SQLite` connection handling.
//!
//! Provides the shared connection wrapper with mutex poison recovery and
//! the pragma configuration applied to every connection.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Helper to acquire the connection mutex with poison recovery.
///
/// If the mutex is poisoned by a panic in a previous critical section, the
/// inner value is recovered and a warning logged; the connection state
/// itself remains valid.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a connection for concurrent access.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout` 5s**: waits for locks instead of failing immediately
/// - **`foreign_keys` ON**: cascading deletes for memberships and chunks
pub(crate) fn configure_connection(conn: &Connection) {
    // journal_mode returns a string result which would fail execute_batch
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    let _ = conn.pragma_update(None, "foreign_keys", "ON");
}

/// Handle to the storage file, shared by [`super::InsightStore`] and
/// [`super::TaskStore`].
///
/// Opening runs the migration chain; a freshly opened database is always
/// at the latest schema version.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl Database {
    /// Opens (creating if necessary) the storage file and applies pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file cannot be opened or a
    /// migration fails.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_sync(&path))
            .await
            .map_err(|e| Error::Storage {
                operation: "open_database".to_string(),
                cause: e.to_string(),
            })?
    }

    /// Synchronous variant of [`Database::open`], used at startup and in
    /// tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file cannot be opened or a
    /// migration fails.
    pub fn open_sync(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Storage {
                operation: "create_db_directory".to_string(),
                cause: e.to_string(),
            })?;
        }

        let mut conn = Connection::open(path).map_err(|e| Error::Storage {
            operation: "open_database".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn);
        super::migrations::run_pending(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if initialization or a migration fails.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|e| Error::Storage {
            operation: "open_database_memory".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn);
        super::migrations::run_pending(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    /// Returns the database path (`None` for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Returns a handle to the shared connection.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

/// Runs a blocking closure against the shared connection on the blocking
/// thread pool. This is the suspension point for every store operation.
pub(crate) async fn with_connection<T, F>(
    conn: &Arc<Mutex<Connection>>,
    operation: &'static str,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = acquire_lock(&conn);
        f(&mut guard)
    })
    .await
    .map_err(|e| Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let mutex_clone = Arc::clone(&mutex);
            handles.push(thread::spawn(move || {
                let mut guard = acquire_lock(&mutex_clone);
                *guard += 1;
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*acquire_lock(&mutex), 10);
    }

    #[test]
    fn test_configure_connection_pragmas() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn);

        // In-memory databases report "memory" instead of "wal"
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert!(
            journal_mode.eq_ignore_ascii_case("wal") || journal_mode.eq_ignore_ascii_case("memory"),
            "unexpected journal mode {journal_mode}"
        );

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        let foreign_keys: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn test_open_sync_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let db = Database::open_sync(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.db_path(), Some(path.as_path()));
    }
}
