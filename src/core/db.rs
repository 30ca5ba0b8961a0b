use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn db_connect(db_path: &str) -> Result<Connection, error::BackroomError> {
    db_connect_pooled(db_path, 5)
}

/// Connect with a caller-chosen busy timeout (seconds).
pub fn db_connect_pooled(
    db_path: &str,
    busy_timeout_secs: u32,
) -> Result<Connection, error::BackroomError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(u64::from(busy_timeout_secs)))
        .map_err(error::BackroomError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::BackroomError::RusqliteError)?;
    Ok(conn)
}

/// Creates the records database (and its parent directory) if needed and
/// applies the schema. Safe to call on every startup.
pub fn initialize_records_db(db_path: &Path) -> Result<(), error::BackroomError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(error::BackroomError::IoError)?;
    }

    let conn = db_connect(&db_path.to_string_lossy())?;
    for statement in schemas::RECORDS_DB_STATEMENTS {
        conn.execute(statement, []).map_err(|e| {
            error::BackroomError::DatabaseInitializationError(format!(
                "{}: {}",
                db_path.display(),
                e
            ))
        })?;
    }

    tracing::debug!(path = %db_path.display(), "records database ready");
    Ok(())
}
