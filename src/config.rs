use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broker::DEFAULT_QUEUE;
use crate::error::ConfigError;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_DB_LOCATION: &str = "./data/calendar.db";
const DEFAULT_SCHEDULER_INTERVAL: &str = "5m";
const DEFAULT_CLEANUP_INTERVAL: &str = "1h";
const DEFAULT_RETENTION: &str = "365days";
const DEFAULT_REQUEST_TIMEOUT: &str = "2s";
const DEFAULT_STORE_TIMEOUT: &str = "5s";

/// Raw `KEY=VALUE` pairs read from an optional config file. Keys missing
/// from the file fall back to the process environment unless disabled with
/// [`AppConfig::without_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    values: HashMap<String, String>,
    env_fallback: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            env_fallback: true,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine {
                    line: idx + 1,
                    content: line.to_string(),
                });
            };
            values.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }
        Ok(Self {
            values,
            env_fallback: true,
        })
    }

    /// Only the file's own values count.
    pub fn without_env(mut self) -> Self {
        self.env_fallback = false;
        self
    }

    /// File value first, then the environment variable of the same name.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| self.env_fallback.then(|| env::var(key).ok()).flatten())
            .filter(|value| !value.is_empty())
    }
}

fn unquote(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted { &value[1..value.len() - 1] } else { value }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Sql { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    pub storage: StorageKind,
    pub scheduler_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention: chrono::Duration,
    pub notify_queue: String,
    pub broker_url: Option<String>,
    pub request_timeout: Duration,
    pub store_timeout: Duration,
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let value = |key: &str, default: &str| config.get(key).unwrap_or_else(|| default.to_string());

        let storage = match value("STORAGE_TYPE", "MEMORY").to_ascii_uppercase().as_str() {
            "MEMORY" => StorageKind::Memory,
            "SQL" => StorageKind::Sql {
                path: PathBuf::from(value("DB_LOCATION", DEFAULT_DB_LOCATION)),
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_TYPE".to_string(),
                    message: format!("expected MEMORY or SQL, got {other:?}"),
                });
            }
        };

        let retention = span("RETENTION", &value("RETENTION", DEFAULT_RETENTION))?;
        let retention = chrono::Duration::from_std(retention).map_err(|err| ConfigError::InvalidValue {
            key: "RETENTION".to_string(),
            message: err.to_string(),
        })?;

        Ok(Self {
            log_level: value("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            storage,
            scheduler_interval: span(
                "SCHEDULER_INTERVAL",
                &value("SCHEDULER_INTERVAL", DEFAULT_SCHEDULER_INTERVAL),
            )?,
            cleanup_interval: span(
                "CLEANUP_INTERVAL",
                &value("CLEANUP_INTERVAL", DEFAULT_CLEANUP_INTERVAL),
            )?,
            retention,
            notify_queue: value("NOTIFY_QUEUE", DEFAULT_QUEUE),
            broker_url: config.get("BROKER_URL"),
            request_timeout: span("REQUEST_TIMEOUT", &value("REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT))?,
            store_timeout: span("STORE_TIMEOUT", &value("STORE_TIMEOUT", DEFAULT_STORE_TIMEOUT))?,
        })
    }
}

/// Non-zero humantime span.
fn span(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };
    let parsed = humantime::parse_duration(raw).map_err(|err| invalid(format!("{raw:?}: {err}")))?;
    if parsed.is_zero() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(parsed)
}
