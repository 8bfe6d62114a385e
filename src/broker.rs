//! # MyMQ Broker
//!
//! Orchestrates producer-side admission: idempotency check, WAL append, peer
//! replication under a quorum, then the queue offer with DLQ fallback. A
//! separate peer-ingress path skips replication so replicas never re-fan-out
//! (loop prevention).
//!
//! The broker holds references to its collaborators only; nothing points back
//! at it, and every admission outcome is reported as a tagged result rather
//! than an error, keeping the HTTP handlers and producer free of exception
//! control flow.

use crate::config::ClusterConfig;
use crate::dlq::DeadLetterQueue;
use crate::idempotency::IdempotencyStore;
use crate::message::Message;
use crate::metrics::MetricsRecorder;
use crate::queue::MessageQueue;
use crate::replication::ReplicationClient;
use crate::wal::WalAppender;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The message ID was already admitted and not yet released.
    Duplicate,
    /// Fewer peer acknowledgements than the effective quorum.
    Quorum,
    /// The main queue was at capacity.
    QueueFull,
    /// The pipeline itself failed (e.g. the queue channel is gone).
    Internal,
}

impl Enqueue {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Enqueue::Accepted)
    }
}

pub struct Broker {
    queue: MessageQueue,
    dlq: DeadLetterQueue,
    wal: WalAppender,
    idempotency: Arc<IdempotencyStore>,
    metrics: Arc<MetricsRecorder>,
    cluster: ClusterConfig,
    replicator: ReplicationClient,
}

impl Broker {
    pub fn new(
        queue: MessageQueue,
        dlq: DeadLetterQueue,
        wal: WalAppender,
        idempotency: Arc<IdempotencyStore>,
        metrics: Arc<MetricsRecorder>,
        cluster: ClusterConfig,
        replicator: ReplicationClient,
    ) -> Self {
        Self {
            queue,
            dlq,
            wal,
            idempotency,
            metrics,
            cluster,
            replicator,
        }
    }

    /// Producer-path admission: idempotency, WAL, replication, quorum, queue.
    ///
    /// Returns only after the quorum is met or the message was rejected; the
    /// caller (the producer) accounts the uncommitted gauge on acceptance.
    pub async fn enqueue(&self, msg: Message) -> Enqueue {
        // Idempotency before WAL: a duplicate must never produce a WAL line.
        if self.idempotency.already_processed(&msg.id) {
            warn!("duplicate message at admission id={}", msg.id);
            self.metrics.record_duplicate();
            return Enqueue::Rejected(RejectReason::Duplicate);
        }

        self.wal.append(&msg);

        let acks = self.replicator.replicate(&self.cluster.peers, &msg).await;
        let needed = self.effective_quorum(self.cluster.peers.len());
        if acks < needed {
            error!(
                "replication quorum failed id={} acks={} needed={}",
                msg.id, acks, needed
            );
            self.dlq.add(msg);
            return Enqueue::Rejected(RejectReason::Quorum);
        }

        self.offer_or_dead_letter(msg)
    }

    /// Replica ingress: same pipeline minus replication and quorum. On
    /// success the broker accounts the uncommitted gauge itself, since no
    /// local producer will.
    pub async fn enqueue_from_peer(&self, msg: Message) -> Enqueue {
        if self.idempotency.already_processed(&msg.id) {
            warn!("duplicate message from peer id={}", msg.id);
            self.metrics.record_duplicate();
            return Enqueue::Rejected(RejectReason::Duplicate);
        }

        self.wal.append(&msg);

        let outcome = self.offer_or_dead_letter(msg);
        if outcome.is_accepted() {
            self.metrics.inc_uncommitted();
        }
        outcome
    }

    fn offer_or_dead_letter(&self, msg: Message) -> Enqueue {
        if self.queue.offer(msg.clone()) {
            return Enqueue::Accepted;
        }
        error!("queue full, routing to dlq id={}", msg.id);
        self.dlq.add(msg);
        Enqueue::Rejected(RejectReason::QueueFull)
    }

    /// Delegate to the queue; consumers poll competitively.
    pub async fn poll(&self, timeout_ms: u64) -> Option<Message> {
        self.queue.poll(timeout_ms).await
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn dlq_len(&self) -> usize {
        self.dlq.len()
    }

    /// Effective quorum: `clamp(cfg.quorum, 1, 1 + peer_count)`.
    fn effective_quorum(&self, peer_count: usize) -> usize {
        let total_nodes = 1 + peer_count;
        let cfg = self.cluster.quorum;
        if cfg <= 0 {
            1
        } else {
            (cfg as usize).min(total_nodes)
        }
    }

    /// Re-inject every WAL record through the peer-ingress path, counting
    /// recovered messages and the total recovery time.
    pub async fn recover_from_wal(self: &Arc<Self>) -> Result<usize> {
        let started = Instant::now();

        let mut records = Vec::new();
        self.wal.replay(|msg| records.push(msg))?;

        let mut recovered = 0usize;
        for msg in records {
            if self.enqueue_from_peer(msg).await.is_accepted() {
                self.metrics.record_recovery_message();
                recovered += 1;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_recovery_time(elapsed_ms);
        info!(
            "wal recovery complete recovered={} elapsed_ms={}",
            recovered, elapsed_ms
        );
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::IdempotencyMode;
    use tempfile::tempdir;

    fn test_broker(
        queue_size: usize,
        dlq_size: usize,
        cluster: ClusterConfig,
    ) -> (Arc<Broker>, Arc<MetricsRecorder>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let metrics = Arc::new(MetricsRecorder::new());
        let broker = Broker::new(
            MessageQueue::new(queue_size),
            DeadLetterQueue::new(dlq_size, Arc::clone(&metrics)),
            WalAppender::new(dir.path().join("wal.log")).unwrap(),
            Arc::new(IdempotencyStore::new(IdempotencyMode::ReleaseOnSuccess)),
            Arc::clone(&metrics),
            cluster,
            ReplicationClient::new().unwrap(),
        );
        (Arc::new(broker), metrics, dir)
    }

    #[tokio::test]
    async fn test_enqueue_accepts_and_appends_wal() {
        let (broker, _metrics, dir) = test_broker(8, 4, ClusterConfig::default());

        let outcome = broker.enqueue(Message::new("hello")).await;
        assert_eq!(outcome, Enqueue::Accepted);
        assert_eq!(broker.queue_len(), 1);

        let wal = std::fs::read_to_string(dir.path().join("wal.log")).unwrap();
        assert_eq!(wal.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_admission_rejected_without_wal_line() {
        let (broker, metrics, dir) = test_broker(8, 4, ClusterConfig::default());

        let msg = Message::new("hello");
        let dup = msg.clone();
        assert!(broker.enqueue(msg).await.is_accepted());
        assert_eq!(
            broker.enqueue(dup).await,
            Enqueue::Rejected(RejectReason::Duplicate)
        );

        let dto = metrics.snapshot();
        assert_eq!(dto.duplicate_count, 1);
        // The duplicate never reached the WAL.
        let wal = std::fs::read_to_string(dir.path().join("wal.log")).unwrap();
        assert_eq!(wal.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_queue_full_routes_to_dlq() {
        let (broker, metrics, _dir) = test_broker(2, 4, ClusterConfig::default());

        assert!(broker.enqueue(Message::new("a")).await.is_accepted());
        assert!(broker.enqueue(Message::new("b")).await.is_accepted());
        assert_eq!(
            broker.enqueue(Message::new("c")).await,
            Enqueue::Rejected(RejectReason::QueueFull)
        );

        assert_eq!(metrics.snapshot().dlq_count, 1);
        assert_eq!(broker.dlq_len(), 1);
    }

    #[tokio::test]
    async fn test_quorum_failure_with_unreachable_peers() {
        let cluster = ClusterConfig {
            node_id: "node-0".to_string(),
            peers: vec![
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:1".to_string(),
            ],
            quorum: 2,
        };
        let (broker, metrics, _dir) = test_broker(8, 4, cluster);

        assert_eq!(
            broker.enqueue(Message::new("x")).await,
            Enqueue::Rejected(RejectReason::Quorum)
        );
        assert_eq!(broker.queue_len(), 0);
        assert_eq!(metrics.snapshot().dlq_count, 1);
    }

    #[tokio::test]
    async fn test_quorum_coercion() {
        // quorum <= 0 coerces to 1: self-ack suffices even with dead peers.
        let cluster = ClusterConfig {
            node_id: "node-0".to_string(),
            peers: vec!["http://127.0.0.1:1".to_string()],
            quorum: 0,
        };
        let (broker, _metrics, _dir) = test_broker(8, 4, cluster);
        assert!(broker.enqueue(Message::new("x")).await.is_accepted());

        // quorum above node count clamps to 1 + peers; with no peers, self meets it.
        let cluster = ClusterConfig {
            node_id: "node-0".to_string(),
            peers: Vec::new(),
            quorum: 99,
        };
        let (broker, _metrics, _dir) = test_broker(8, 4, cluster);
        assert!(broker.enqueue(Message::new("y")).await.is_accepted());
    }

    #[tokio::test]
    async fn test_peer_ingress_increments_uncommitted() {
        let (broker, metrics, _dir) = test_broker(8, 4, ClusterConfig::default());

        assert!(broker.enqueue_from_peer(Message::new("r")).await.is_accepted());
        assert_eq!(metrics.uncommitted(), 1);

        // Producer-path admission leaves the gauge to the producer.
        assert!(broker.enqueue(Message::new("p")).await.is_accepted());
        assert_eq!(metrics.uncommitted(), 1);
    }

    #[tokio::test]
    async fn test_recover_from_wal_reinjects_records() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal.log");

        // A previous run leaves three records behind.
        let seed = WalAppender::new(&wal_path).unwrap();
        for i in 0..3 {
            seed.append(&Message::new(format!("old-{i}")));
        }

        let metrics = Arc::new(MetricsRecorder::new());
        let broker = Arc::new(Broker::new(
            MessageQueue::new(8),
            DeadLetterQueue::new(4, Arc::clone(&metrics)),
            WalAppender::new(&wal_path).unwrap(),
            Arc::new(IdempotencyStore::default()),
            Arc::clone(&metrics),
            ClusterConfig::default(),
            ReplicationClient::new().unwrap(),
        ));

        let recovered = broker.recover_from_wal().await.unwrap();
        assert_eq!(recovered, 3);
        assert_eq!(broker.queue_len(), 3);

        let dto = metrics.snapshot();
        assert_eq!(dto.recovered_messages, 3);
        assert_eq!(dto.uncommitted_count, 3);
    }
}
