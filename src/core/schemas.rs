//! Database schema definitions for the record store.
//!
//! Backroom keeps every cage in a single SQLite database. Cages are not
//! entities of their own: a cage exists exactly as long as at least one
//! record carries its name.

pub const RECORDS_DB_NAME: &str = "backroom.db";

pub const RECORDS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        cage TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const RECORDS_DB_SCHEMA_CAGE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_cage ON records(cage, id)";

/// Statements applied, in order, whenever the records database is opened.
pub const RECORDS_DB_STATEMENTS: &[&str] = &[RECORDS_DB_SCHEMA, RECORDS_DB_SCHEMA_CAGE_INDEX];
