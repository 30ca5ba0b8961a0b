//! SQLite connection handling with read/write separation.
//!
//! - Writes are serialized through a **write mutex** and use a fresh connection.
//! - Reads create fresh connections per operation (no mutex, concurrent via WAL).
//!
//! Connections are NOT pooled (opened fresh each time) so that concurrent
//! request handlers never share a `rusqlite::Connection` across threads.

use crate::core::db;
use crate::core::error::BackroomError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Write connection busy_timeout in seconds.
const WRITE_BUSY_TIMEOUT_SECS: u32 = 5;
/// Read connection busy_timeout in seconds.
const READ_BUSY_TIMEOUT_SECS: u32 = 5;

/// Read/write access to a single SQLite database file.
pub struct SqlitePool {
    write_lock: Mutex<()>,
    db_path: PathBuf,
}

impl SqlitePool {
    pub fn new(db_path: &Path) -> Self {
        Self {
            write_lock: Mutex::new(()),
            db_path: db_path.to_path_buf(),
        }
    }

    /// Execute a closure with a write connection. Writes are serialized.
    pub fn with_write<F, R>(&self, f: F) -> Result<R, BackroomError>
    where
        F: FnOnce(&Connection) -> Result<R, BackroomError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BackroomError::IoError(std::io::Error::other("pool write lock poisoned")))?;

        let conn = db::db_connect_pooled(&self.db_path.to_string_lossy(), WRITE_BUSY_TIMEOUT_SECS)?;

        f(&conn)
    }

    /// Execute a closure with a read connection (no mutex serialization).
    pub fn with_read<F, R>(&self, f: F) -> Result<R, BackroomError>
    where
        F: FnOnce(&Connection) -> Result<R, BackroomError>,
    {
        let conn = db::db_connect_pooled(&self.db_path.to_string_lossy(), READ_BUSY_TIMEOUT_SECS)?;

        f(&conn)
    }
}
