//! Delivery adapters: named capabilities hooks deliver through.

use crate::core::config::Config;
use crate::core::error::BackroomError;
use crate::core::store::Record;
use crate::hooks::log::LogAdapter;
use crate::hooks::mail::{self, MailAdapter};
use crate::hooks::rule::{Action, HookRule};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an adapter while delivering one notification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not build message: {0}")]
    Message(String),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// A named delivery capability. Implementations must be safe to call from
/// concurrent request handlers.
pub trait Adapter: Send + Sync {
    /// Checks a rule's `target` when hooks are loaded.
    fn check_target(&self, _target: &str) -> Result<(), String> {
        Ok(())
    }

    fn deliver(&self, rule: &HookRule, action: Action, record: &Record) -> Result<(), DeliveryError>;
}

/// Adapters keyed by the name hook rules refer to them by.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSet")
            .field("names", &self.names())
            .finish()
    }
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: &str, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(name.to_string(), adapter);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Builds the adapters available under `config`.
    ///
    /// `log` is always present. A mail adapter is registered as `mail` and
    /// under its transport name only when a delivery method is configured.
    pub fn from_config(config: &Config) -> Result<Self, BackroomError> {
        let mut set = AdapterSet::new();
        set.register("log", Arc::new(LogAdapter));

        if let Some(method) = config.mail.resolved_delivery_method() {
            let transport = mail::transport_for(method, config)?;
            let adapter: Arc<dyn Adapter> = Arc::new(MailAdapter::new(mail::sender(config)?, transport));
            set.register("mail", Arc::clone(&adapter));
            set.register(method.as_str(), adapter);
        }

        tracing::debug!(adapters = ?set.names(), "delivery adapters ready");
        Ok(set)
    }
}
