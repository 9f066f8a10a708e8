//! Error types for the calendar scheduler.

use thiserror::Error;

/// Coarse classification used by callers to decide whether to surface,
/// retry on the next tick, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Transient,
}

/// Errors raised by event stores and the event service.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("user id is required")]
    MissingUserId,

    #[error("event id is required")]
    MissingEventId,

    #[error("title is required")]
    MissingTitle,

    #[error("date is required")]
    MissingDate,

    #[error("duration is required")]
    MissingDuration,

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid date range")]
    InvalidRange,

    #[error("date is busy")]
    DateBusy,

    #[error("event not found")]
    EventNotFound,

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid persisted event data: {0}")]
    InvalidData(String),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion { db_version: i64, latest_supported: i64 },

    #[error("storage task failed: {0}")]
    Task(String),
}

impl CalendarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingUserId
            | Self::MissingEventId
            | Self::MissingTitle
            | Self::MissingDate
            | Self::MissingDuration
            | Self::InvalidDuration(_)
            | Self::InvalidRange => ErrorKind::Validation,
            Self::DateBusy => ErrorKind::Conflict,
            Self::EventNotFound => ErrorKind::NotFound,
            Self::Cancelled
            | Self::Database(_)
            | Self::InvalidData(_)
            | Self::UnsupportedSchemaVersion { .. }
            | Self::Task(_) => ErrorKind::Transient,
        }
    }
}

/// Errors raised while publishing to or consuming from a broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("queue {0} is full")]
    QueueFull(String),

    #[error("queue {0} is closed")]
    Closed(String),

    #[error("queue {0} already has a consumer")]
    AlreadyConsumed(String),

    #[error("publish timed out")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker rejected message with status {0}")]
    Rejected(u16),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("invalid config line {line}: {content}")]
    InvalidLine { line: usize, content: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
