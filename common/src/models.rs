// Data models for queued messages and ingest candidates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full key → message mapping, as persisted and as returned to readers.
pub type Snapshot = BTreeMap<String, QueuedMessage>;

/// Ingest batch: key → unvalidated candidate.
pub type CandidateBatch = BTreeMap<String, MessageCandidate>;

/// A validated message waiting for its due time.
///
/// `due_at` travels as epoch milliseconds under the `timestamp` name, the same
/// shape callers use on ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub due_at: DateTime<Utc>,
}

/// An ingest entry before validation.
///
/// Every field is optional at this level so that missing or mistyped values
/// surface as a `ValidationError` naming the key instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageCandidate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

impl MessageCandidate {
    pub fn new(message: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            title: None,
            message: Some(message.into()),
            timestamp: Some(serde_json::Value::from(due_at.timestamp_millis())),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
