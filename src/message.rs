//! Message DTO shared by the producer, broker, WAL, and replication paths.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A single message flowing through the pipeline.
///
/// `id` is globally unique; `(key, sequence)` is producer-local and strictly
/// monotonic per key. The WAL and the peer replication endpoint both carry
/// this exact shape as one JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: String,
    /// Creation time in epoch milliseconds; consumers derive end-to-end
    /// latency from it.
    pub timestamp: u64,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl Message {
    /// Create a message with a fresh UUID and the current timestamp.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            timestamp: epoch_ms(),
            key: None,
            sequence: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
