// Error handling framework

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Ingest validation errors. Any one of these rejects the whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid key '{key}': length must be between 1 and {max} characters")]
    InvalidKeyLength { key: String, max: usize },

    #[error("Missing required field '{field}' for key '{key}'")]
    MissingField { key: String, field: String },

    #[error("Invalid field value for '{key}.{field}': {reason}")]
    InvalidFieldValue {
        key: String,
        field: String,
        reason: String,
    },

    #[error("Message '{key}' is due at {due_at}, which is not in the future")]
    NotInFuture { key: String, due_at: DateTime<Utc> },
}

impl ValidationError {
    /// Key of the offending entry
    pub fn key(&self) -> &str {
        match self {
            ValidationError::InvalidKeyLength { key, .. }
            | ValidationError::MissingField { key, .. }
            | ValidationError::InvalidFieldValue { key, .. }
            | ValidationError::NotInFuture { key, .. } => key,
        }
    }
}

/// Snapshot storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Notification delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    HttpRequestFailed(String),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid notifier configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors returned through a scheduler handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Scheduler engine is not running")]
    EngineStopped,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::HttpRequestFailed(err.to_string())
    }
}
