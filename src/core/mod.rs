//! Core modules: configuration, errors, persistence, and shared helpers.

pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod pool;
pub mod schemas;
pub mod store;
pub mod time;
