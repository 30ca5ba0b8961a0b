//! Tracing subscriber setup.
//!
//! Filter: `BACKROOM_LOG` when set, else `log.level` from config.
//! Terminal output is human-readable on stderr; when `log.file` is set, a
//! JSON layer appends one object per event to that file.

use crate::core::config::{LOG_ENV, LogConfig};
use crate::core::error::BackroomError;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Library noise kept out of the terminal even at debug level.
const QUIET_DEPENDENCIES: &str = "hyper=warn,h2=warn,tower=warn,rustls=warn,ureq=warn";

fn filter_directive(config: &LogConfig) -> String {
    let level = std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());
    format!("{},{}", level.trim(), QUIET_DEPENDENCIES)
}

fn filter(directive: &str) -> Result<EnvFilter, BackroomError> {
    EnvFilter::try_new(directive)
        .map_err(|e| BackroomError::ConfigError(format!("log filter '{}': {}", directive, e)))
}

/// Installs the global subscriber. Calling it twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init(config: &LogConfig) -> Result<(), BackroomError> {
    let directive = filter_directive(config);

    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter(&directive)?);

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_current_span(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter(&directive)?),
            )
        }
        None => None,
    };

    if tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
