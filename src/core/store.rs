//! Record store: the data model for caged records and its SQLite backing.
//!
//! A record is one JSON object payload filed under a caller-chosen cage name.
//! Identifiers are ULIDs generated by the application at creation time, so
//! they sort by creation order and serialize as URL-safe strings.

use crate::core::error::BackroomError;
use crate::core::pool::SqlitePool;
use crate::core::time;
use crate::core::db;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use ulid::{Generator, Ulid};

/// JSON object payload carried by a record.
pub type Payload = Map<String, Value>;

/// Time-ordered, collision-resistant record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(Ulid);

impl RecordId {
    /// Generates a new identifier. Identifiers generated by one process are
    /// strictly increasing, even within the same millisecond.
    pub fn generate() -> Self {
        static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
        let generator = GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
        let next = generator
            .lock()
            .ok()
            .and_then(|mut g| g.generate().ok())
            .unwrap_or_else(Ulid::new);
        RecordId(next)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = BackroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(RecordId)
            .map_err(|e| BackroomError::InvalidId {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl TryFrom<String> for RecordId {
    type Error = BackroomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

/// One JSON document filed under a cage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub cage: String,
    pub data: Payload,
    pub created_at: String,
    pub updated_at: String,
}

impl Record {
    /// Builds a new, not yet persisted record with a fresh identifier.
    pub fn new(cage: &str, data: Payload) -> Result<Self, BackroomError> {
        let cage = cage.trim();
        if cage.is_empty() {
            return Err(BackroomError::ValidationError(
                "Cage name must not be empty".to_string(),
            ));
        }
        let now = time::now_epoch_z();
        Ok(Record {
            id: RecordId::generate(),
            cage: cage.to_string(),
            data,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Builds a new record from JSON text. The text must hold a JSON object.
    pub fn from_json_str(cage: &str, json: &str) -> Result<Self, BackroomError> {
        let value: Value = serde_json::from_str(json)?;
        Record::new(cage, payload_from_value(value)?)
    }
}

/// Accepts only JSON objects as record payloads.
pub fn payload_from_value(value: Value) -> Result<Payload, BackroomError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(BackroomError::ValidationError(format!(
            "Record data must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Durable keyed storage of records grouped by cage.
pub trait RecordStore: Send + Sync {
    fn create(&self, record: &Record) -> Result<(), BackroomError>;

    /// Fails with `NotFound` when no record has this id.
    fn get(&self, id: RecordId) -> Result<Record, BackroomError>;

    /// Records of one cage, most recent first.
    fn list_by_cage(&self, cage: &str) -> Result<Vec<Record>, BackroomError>;

    /// Distinct cage names, sorted.
    fn list_cages(&self) -> Result<Vec<String>, BackroomError>;

    /// Replaces the payload of an existing record. Fails with `NotFound`
    /// when the record does not exist.
    fn update(&self, record: &Record) -> Result<(), BackroomError>;

    /// Removes a record and returns it as it was at the moment of deletion.
    fn delete(&self, id: RecordId) -> Result<Record, BackroomError>;

    /// Deletes every record in a cage in one statement and returns exactly
    /// the records removed, most recent first.
    fn delete_cage(&self, cage: &str) -> Result<Vec<Record>, BackroomError>;
}

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

const RECORD_COLUMNS: &str = "id, cage, data, created_at, updated_at";

impl SqliteRecordStore {
    /// Opens (and initializes if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, BackroomError> {
        db::initialize_records_db(db_path)?;
        Ok(Self {
            pool: SqlitePool::new(db_path),
        })
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let id = id
        .parse::<RecordId>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let data: String = row.get(2)?;
    let data: Payload = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(Record {
        id,
        cage: row.get(1)?,
        data,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl RecordStore for SqliteRecordStore {
    fn create(&self, record: &Record) -> Result<(), BackroomError> {
        let data = serde_json::to_string(&record.data)?;
        self.pool.with_write(|conn| {
            conn.execute(
                "INSERT INTO records(id, cage, data, created_at, updated_at) VALUES(?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.cage,
                    data,
                    record.created_at,
                    record.updated_at
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: RecordId) -> Result<Record, BackroomError> {
        self.pool.with_read(|conn| {
            let sql = format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS);
            conn.query_row(&sql, params![id.to_string()], record_from_row)
                .optional()?
                .ok_or_else(|| BackroomError::NotFound(format!("record {}", id)))
        })
    }

    fn list_by_cage(&self, cage: &str) -> Result<Vec<Record>, BackroomError> {
        self.pool.with_read(|conn| {
            let sql = format!(
                "SELECT {} FROM records WHERE cage = ?1 ORDER BY id DESC",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![cage], record_from_row)?;

            let mut results = Vec::new();
            for r in rows {
                results.push(r?);
            }
            Ok(results)
        })
    }

    fn list_cages(&self) -> Result<Vec<String>, BackroomError> {
        self.pool.with_read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT cage FROM records ORDER BY cage")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut results = Vec::new();
            for r in rows {
                results.push(r?);
            }
            Ok(results)
        })
    }

    fn update(&self, record: &Record) -> Result<(), BackroomError> {
        let data = serde_json::to_string(&record.data)?;
        self.pool.with_write(|conn| {
            let changed = conn.execute(
                "UPDATE records SET data = ?1, updated_at = ?2 WHERE id = ?3",
                params![data, record.updated_at, record.id.to_string()],
            )?;
            if changed == 0 {
                return Err(BackroomError::NotFound(format!("record {}", record.id)));
            }
            Ok(())
        })
    }

    fn delete(&self, id: RecordId) -> Result<Record, BackroomError> {
        self.pool.with_write(|conn| {
            let sql = format!("DELETE FROM records WHERE id = ?1 RETURNING {}", RECORD_COLUMNS);
            conn.query_row(&sql, params![id.to_string()], record_from_row)
                .optional()?
                .ok_or_else(|| BackroomError::NotFound(format!("record {}", id)))
        })
    }

    fn delete_cage(&self, cage: &str) -> Result<Vec<Record>, BackroomError> {
        self.pool.with_write(|conn| {
            let sql = format!("DELETE FROM records WHERE cage = ?1 RETURNING {}", RECORD_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![cage], record_from_row)?;

            let mut removed = Vec::new();
            for r in rows {
                removed.push(r?);
            }
            // RETURNING order is unspecified.
            removed.sort_by(|a, b| b.id.cmp(&a.id));
            Ok(removed)
        })
    }
}
