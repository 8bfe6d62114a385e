//! # MyMQ Core Library
//!
//! MyMQ is an in-process message broker built to be measured head-to-head
//! against an external log broker on a fixed set of quality attributes:
//! throughput, end-to-end latency (avg/p95/p99), consistency (duplicate
//! detection, per-key ordering), durability (write-ahead log, uncommitted
//! tracking, dead-letter routing), and cross-node replication under a
//! configurable acknowledgement quorum.
//!
//! ## Architecture Overview
//!
//! - [`broker`] - admission orchestration: idempotency, WAL, replication,
//!   quorum, queue offer with DLQ fallback
//! - [`producer`] - ID/sequence/timestamp assignment and publishing
//! - [`consumer`] - worker pool with windowed dedup and order checking
//! - [`queue`] / [`dlq`] - bounded MPMC queue and dead-letter overflow sink
//! - [`wal`] - append-only line-delimited JSON log with replay
//! - [`replication`] - best-effort unary fan-out to peer nodes
//! - [`idempotency`] - admission-time duplicate rejection
//! - [`metrics`] - lock-free counters, percentile estimation, sliding window
//! - [`http_server`] - dashboard and peer-ingress endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mymq::config::ClusterConfig;
//! use mymq::{
//!     Broker, DeadLetterQueue, IdempotencyStore, Message, MessageQueue,
//!     MetricsRecorder, ReplicationClient, WalAppender,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mymq::Result<()> {
//!     let metrics = Arc::new(MetricsRecorder::new());
//!     let broker = Broker::new(
//!         MessageQueue::new(10_000),
//!         DeadLetterQueue::new(1_000, Arc::clone(&metrics)),
//!         WalAppender::new("./mymq-wal.log")?,
//!         Arc::new(IdempotencyStore::default()),
//!         Arc::clone(&metrics),
//!         ClusterConfig::default(),
//!         ReplicationClient::new()?,
//!     );
//!
//!     broker.enqueue(Message::new("hello")).await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod http_server;
pub mod idempotency;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod replication;
pub mod wal;

pub use broker::{Broker, Enqueue, RejectReason};
pub use config::BrokerConfig;
pub use consumer::{ConsumerPool, LogProcessor, Processor, DEDUPE_WINDOW_SIZE};
pub use dlq::DeadLetterQueue;
pub use http_server::{AppState, ComparisonSnapshot};
pub use idempotency::{IdempotencyMode, IdempotencyStore};
pub use message::Message;
pub use metrics::{MetricsDto, MetricsRecorder, LAT_BUF_SIZE};
pub use producer::MymqProducer;
pub use queue::MessageQueue;
pub use replication::ReplicationClient;
pub use wal::WalAppender;

use thiserror::Error;

/// MyMQ error types.
///
/// Admission outcomes are deliberately not errors (see [`broker::Enqueue`]);
/// this enum covers the genuinely failing paths: storage I/O, JSON codec,
/// configuration, and transport construction.
#[derive(Debug, Error)]
pub enum MymqError {
    /// File I/O failures (WAL, listener binding).
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON encoding/decoding failures.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration validation and parsing errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Replication transport errors.
    #[error("Replication error: {0}")]
    Replication(String),

    /// Queue and processing errors.
    #[error("Queue error: {0}")]
    Queue(String),
}

/// Result type alias used throughout MyMQ.
pub type Result<T> = std::result::Result<T, MymqError>;
