use crate::hooks::adapter::DeliveryError;
use crate::hooks::condition::ConditionError;
use crate::hooks::rule::Action;
use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackroomError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid record id '{input}': {reason}")]
    InvalidId { input: String, reason: String },
    #[error("Hook #{rule} names unknown adapter '{adapter}'")]
    UnknownAdapter { rule: usize, adapter: String },
    #[error("Hook #{rule} condition failed to evaluate: {source}")]
    EvaluationError {
        rule: usize,
        #[source]
        source: ConditionError,
    },
    #[error("Hook #{rule} delivery via '{adapter}' failed: {source}")]
    DeliveryError {
        rule: usize,
        adapter: String,
        #[source]
        source: DeliveryError,
    },
    #[error("Record {record_id} was {action}d but its hooks failed: {source}")]
    HookFailed {
        action: Action,
        record_id: String,
        #[source]
        source: Box<BackroomError>,
    },
}
