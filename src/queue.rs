//! Bounded in-memory message queue.
//!
//! A fixed-capacity MPMC channel: producers `offer` without blocking,
//! consumers `poll` with a timeout. FIFO holds per producer; no global
//! ordering across producers is claimed.

use crate::message::Message;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: flume::Sender<Message>,
    rx: flume::Receiver<Message>,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx }
    }

    /// Non-blocking insert. Returns whether the message was accepted.
    pub fn offer(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(msg)) => {
                debug!("queue full, rejecting id={}", msg.id);
                false
            }
            Err(flume::TrySendError::Disconnected(msg)) => {
                debug!("queue disconnected, rejecting id={}", msg.id);
                false
            }
        }
    }

    /// Wait up to `timeout_ms` for a message. Workers poll competitively;
    /// each message is delivered to exactly one of them.
    pub async fn poll(&self, timeout_ms: u64) -> Option<Message> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.rx.recv_async()).await {
            Ok(Ok(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
