//! Runtime configuration loaded from `backroom.toml`.
//!
//! Priority, highest first:
//!
//! 1. Environment variables (`BACKROOM_DATABASE_PATH`, `BACKROOM_API_LISTEN`, `BACKROOM_LOG`)
//! 2. The TOML file (`--config`, `BACKROOM_CONFIG`, or `./backroom.toml`)
//! 3. Default values
//!
//! A missing file is not an error: the process starts with defaults and no hooks.

use crate::core::error::BackroomError;
use crate::core::schemas;
use crate::hooks::rule::HookRuleConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "backroom.toml";
pub const CONFIG_ENV: &str = "BACKROOM_CONFIG";
const DATABASE_PATH_ENV: &str = "BACKROOM_DATABASE_PATH";
const API_LISTEN_ENV: &str = "BACKROOM_API_LISTEN";
pub const LOG_ENV: &str = "BACKROOM_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    /// User friendly name of the deployment.
    pub app_name: String,
    /// Administrative address; default sender for mail hooks.
    pub admin_email: String,
    /// Fully qualified URL the API is served from.
    pub api_url: String,
    /// Address and port the API listens on.
    pub api_listen: String,
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub mail: MailConfig,
    pub hooks: Vec<HookRuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            app_name: "backroom".to_string(),
            admin_email: String::new(),
            api_url: "http://localhost:8080".to_string(),
            api_listen: "127.0.0.1:8080".to_string(),
            database: DatabaseConfig::default(),
            log: LogConfig::default(),
            mail: MailConfig::default(),
            hooks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(schemas::RECORDS_DB_NAME),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `backroom=debug`.
    pub level: String,
    /// Optional file receiving JSON-formatted log lines.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMethod {
    Smtp,
    Sendgrid,
    LogOnly,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Smtp => "smtp",
            DeliveryMethod::Sendgrid => "sendgrid",
            DeliveryMethod::LogOnly => "log-only",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// Display name in the From header. Defaults to `app_name`.
    pub from_name: String,
    /// Address in the From header. Defaults to `admin_email`.
    pub from_address: String,
    /// Explicit transport choice. When unset, SMTP is used if a host is configured.
    pub delivery_method: Option<DeliveryMethod>,
    pub smtp: SmtpConfig,
    pub sendgrid: SendGridConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    /// Implicit TLS. Plain connections are only used when explicitly disabled.
    pub tls: bool,
    pub skip_verify: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            username: String::new(),
            password: String::new(),
            tls: true,
            skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SendGridConfig {
    pub api_key: String,
}

impl MailConfig {
    /// The transport mail hooks should use, if any.
    pub fn resolved_delivery_method(&self) -> Option<DeliveryMethod> {
        match self.delivery_method {
            Some(method) => Some(method),
            None if !self.smtp.host.trim().is_empty() => Some(DeliveryMethod::Smtp),
            None => None,
        }
    }
}

impl Config {
    /// Resolves which config file to read: explicit path, then `BACKROOM_CONFIG`,
    /// then `backroom.toml` in the working directory.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Loads, applies environment overrides, and validates.
    pub fn load(explicit: Option<&Path>) -> Result<Self, BackroomError> {
        let path = Self::resolve_path(explicit);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(BackroomError::IoError)?;
            Self::from_toml_str(&content).map_err(|e| match e {
                BackroomError::ConfigError(msg) => {
                    BackroomError::ConfigError(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })?
        } else if explicit.is_some() {
            return Err(BackroomError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text without touching the environment or validating.
    pub fn from_toml_str(content: &str) -> Result<Self, BackroomError> {
        toml::from_str(content).map_err(|e| BackroomError::ConfigError(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var(DATABASE_PATH_ENV) {
            if !path.trim().is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
        if let Ok(listen) = env::var(API_LISTEN_ENV) {
            if !listen.trim().is_empty() {
                self.api_listen = listen;
            }
        }
        if let Ok(level) = env::var(LOG_ENV) {
            if !level.trim().is_empty() {
                self.log.level = level;
            }
        }
    }

    /// Structural validation. Hook rules are checked here; their conditions
    /// are compiled when the registry is built.
    pub fn validate(&self) -> Result<(), BackroomError> {
        self.listen_addr()?;

        if !self.admin_email.is_empty() && !self.admin_email.contains('@') {
            return Err(BackroomError::ConfigError(format!(
                "admin_email '{}' is not an email address",
                self.admin_email
            )));
        }

        match self.mail.delivery_method {
            Some(DeliveryMethod::Smtp) if self.mail.smtp.host.trim().is_empty() => {
                return Err(BackroomError::ConfigError(
                    "mail.delivery_method = \"smtp\" requires mail.smtp.host".to_string(),
                ));
            }
            Some(DeliveryMethod::Sendgrid) if self.mail.sendgrid.api_key.trim().is_empty() => {
                return Err(BackroomError::ConfigError(
                    "mail.delivery_method = \"sendgrid\" requires mail.sendgrid.api_key"
                        .to_string(),
                ));
            }
            _ => {}
        }

        if self.mail.resolved_delivery_method().is_some() && self.mail_from_address().is_empty() {
            return Err(BackroomError::ConfigError(
                "mail delivery requires mail.from_address or admin_email".to_string(),
            ));
        }

        for (index, hook) in self.hooks.iter().enumerate() {
            hook.validate(index)?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, BackroomError> {
        self.api_listen.parse().map_err(|e| {
            BackroomError::ConfigError(format!("api_listen '{}': {}", self.api_listen, e))
        })
    }

    pub fn mail_from_address(&self) -> &str {
        if self.mail.from_address.trim().is_empty() {
            self.admin_email.trim()
        } else {
            self.mail.from_address.trim()
        }
    }

    /// Display name for the sender mailbox.
    pub fn mail_from_name(&self) -> &str {
        [self.mail.from_name.trim(), self.app_name.trim()]
            .into_iter()
            .find(|n| !n.is_empty())
            .unwrap_or("backroom")
    }
}
