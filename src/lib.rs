//! Backroom: a record store with hooks.
//!
//! **Backroom keeps JSON documents in named cages and tells other systems when they change.**
//!
//! Records are opaque JSON objects filed under a caller-chosen cage name.
//! Every create, update, and delete runs the hook rules configured for that
//! cage: a rule can filter on the payload with a small condition language
//! and delivers through a named adapter (structured log or mail).
//!
//! # Architecture
//!
//! ```text
//! HTTP / CLI  ->  service::Backroom  ->  RecordStore (SQLite)
//!                        |
//!                        v
//!                 hooks::Dispatcher -> HookRegistry -> Condition -> AdapterSet
//! ```
//!
//! - Dispatch is synchronous, in configuration order, and stops at the first
//!   failing rule. A failed hook never undoes the mutation that triggered it.
//! - Registry and adapters are built once from configuration and shared
//!   read-only for the life of the process.
//!
//! # Examples
//!
//! ```bash
//! # Serve the HTTP API
//! backroom serve --listen 127.0.0.1:8080
//!
//! # File a record and read it back
//! backroom cage create orders '{"total": 150}'
//! backroom cage get 01J9Z3J4X6B0M8Q2W6T7Y5V1RA
//!
//! # See which hooks would run
//! backroom hooks list --cage orders
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, errors, and the record store
//! - [`hooks`]: rules, conditions, adapters, and dispatch
//! - [`service`]: mutations followed by dispatch
//! - [`http`]: the axum router

pub mod core;
pub mod hooks;
pub mod http;
pub mod logging;
pub mod service;

mod cli;

use clap::Parser;
use crate::core::error;

pub use crate::core::config::Config;
pub use crate::core::error::BackroomError;
pub use crate::core::store::{Payload, Record, RecordId, RecordStore, SqliteRecordStore};
pub use service::Backroom;

pub fn run() -> Result<(), error::BackroomError> {
    let cli = cli::Cli::parse();
    cli::run_cli(cli)
}
