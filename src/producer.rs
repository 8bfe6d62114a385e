//! MyMQ producer: assigns IDs, per-key monotonic sequence numbers, and
//! timestamps, then hands the message to the broker.

use crate::broker::{Broker, Enqueue};
use crate::message::{epoch_ms, Message};
use crate::metrics::MetricsRecorder;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Key assigned when the caller provides none.
pub const DEFAULT_KEY: &str = "key-default";

/// Number of buckets used by [`MymqProducer::derive_key`].
const KEY_BUCKETS: u64 = 16;

pub struct MymqProducer {
    broker: Arc<Broker>,
    metrics: Arc<MetricsRecorder>,
    seq_by_key: DashMap<String, AtomicU64>,
}

impl MymqProducer {
    pub fn new(broker: Arc<Broker>, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            broker,
            metrics,
            seq_by_key: DashMap::new(),
        }
    }

    /// Derive a stable key from the payload: same payload, same key. Used by
    /// callers that want keyed ordering without choosing keys themselves.
    pub fn derive_key(payload: &str) -> String {
        if payload.trim().is_empty() {
            return DEFAULT_KEY.to_string();
        }
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        format!("key-{}", hasher.finish() % KEY_BUCKETS)
    }

    /// Strictly increasing sequence per key, starting at 1.
    fn next_seq(&self, key: &str) -> u64 {
        self.seq_by_key
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    /// Publish one message. Returns whether the broker accepted it; on
    /// acceptance the uncommitted gauge is incremented here (the broker never
    /// double-counts producer-path admissions).
    pub async fn publish(&self, key: Option<&str>, payload: &str) -> bool {
        if payload.trim().is_empty() {
            warn!("skipping empty payload");
            return false;
        }

        let key = match key {
            Some(k) if !k.trim().is_empty() => k.to_string(),
            _ => DEFAULT_KEY.to_string(),
        };

        let msg = Message {
            id: Uuid::new_v4().to_string(),
            payload: payload.to_string(),
            timestamp: epoch_ms(),
            sequence: Some(self.next_seq(&key)),
            key: Some(key),
        };
        let id = msg.id.clone();

        match self.broker.enqueue(msg).await {
            Enqueue::Accepted => {
                debug!("published id={}", id);
                self.metrics.inc_uncommitted();
                true
            }
            Enqueue::Rejected(reason) => {
                warn!("publish rejected id={} reason={:?}", id, reason);
                false
            }
        }
    }

    /// Forget all per-key sequence counters (metrics reset, scope=all).
    pub fn reset_sequences(&self) {
        self.seq_by_key.clear();
    }
}
