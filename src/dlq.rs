//! Dead-letter queue: bounded overflow sink for undeliverable messages.

use crate::message::Message;
use crate::metrics::MetricsRecorder;
use crate::queue::MessageQueue;
use std::sync::Arc;
use tracing::{error, warn};

/// Holds messages rejected by the main pipeline (quorum shortfall, queue
/// overflow, admission errors). A full DLQ drops the message and counts a
/// processing failure instead of a DLQ event, so the DLQ count never exceeds
/// its capacity.
#[derive(Debug)]
pub struct DeadLetterQueue {
    inner: MessageQueue,
    metrics: Arc<MetricsRecorder>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            inner: MessageQueue::new(capacity),
            metrics,
        }
    }

    pub fn add(&self, msg: Message) {
        let id = msg.id.clone();
        if self.inner.offer(msg) {
            warn!("message routed to dlq id={}", id);
            self.metrics.record_dlq();
        } else {
            error!("dlq full, dropping id={}", id);
            self.metrics.record_failure();
        }
    }

    pub async fn poll(&self, timeout_ms: u64) -> Option<Message> {
        self.inner.poll(timeout_ms).await
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
