//! # MyMQ Consumer Pool
//!
//! N worker tasks competitively polling the broker queue. Each worker runs
//! the same loop: poll, post-admission dedup over a bounded window, per-key
//! order check, processing via the [`Processor`] extension point, and metric
//! updates with a balanced uncommitted gauge (exactly one decrement per
//! polled message, whatever the outcome).

use crate::broker::Broker;
use crate::idempotency::IdempotencyStore;
use crate::message::{epoch_ms, Message};
use crate::metrics::MetricsRecorder;
use crate::Result;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the post-admission dedup window.
pub const DEDUPE_WINDOW_SIZE: usize = 100_000;

/// How long each poll waits before the worker parks.
const POLL_WAIT_MS: u64 = 50;

/// Bound on the shutdown join.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Message-handling extension point. The default implementation accepts
/// everything; tests and embedders substitute their own.
pub trait Processor: Send + Sync {
    fn process(&self, msg: &Message) -> Result<()>;
}

/// Default processor: log and succeed.
#[derive(Debug, Default)]
pub struct LogProcessor;

impl Processor for LogProcessor {
    fn process(&self, msg: &Message) -> Result<()> {
        debug!("processed id={} payload={}", msg.id, msg.payload);
        Ok(())
    }
}

/// Bounded FIFO-plus-set of recently processed message IDs. Inserting beyond
/// capacity evicts the oldest ID. One mutex guards both containers; the
/// critical section is a couple of hash operations.
#[derive(Debug)]
struct DedupeWindow {
    capacity: usize,
    inner: Mutex<DedupeInner>,
}

#[derive(Debug, Default)]
struct DedupeInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(DedupeInner::default()),
        }
    }

    /// Returns `true` when the ID is new, registering it; `false` on a
    /// duplicate.
    fn check_and_remember(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("dedupe window lock poisoned");
        if !inner.seen.insert(id.to_string()) {
            return false;
        }
        inner.order.push_back(id.to_string());
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().expect("dedupe window lock poisoned");
        inner.seen.clear();
        inner.order.clear();
    }
}

pub struct ConsumerPool {
    broker: Arc<Broker>,
    metrics: Arc<MetricsRecorder>,
    idempotency: Arc<IdempotencyStore>,
    processor: Arc<dyn Processor>,
    dedupe: Arc<DedupeWindow>,
    last_seq_by_key: Arc<DashMap<String, u64>>,
    running: Arc<AtomicBool>,
    num_workers: usize,
    poll_interval_ms: u64,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerPool {
    pub fn new(
        broker: Arc<Broker>,
        metrics: Arc<MetricsRecorder>,
        idempotency: Arc<IdempotencyStore>,
        processor: Arc<dyn Processor>,
        num_workers: usize,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            broker,
            metrics,
            idempotency,
            processor,
            dedupe: Arc::new(DedupeWindow::new(DEDUPE_WINDOW_SIZE)),
            last_seq_by_key: Arc::new(DashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            num_workers: num_workers.max(1),
            poll_interval_ms,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker loops. Idempotent: calling twice while running is a
    /// no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock().expect("consumer handles lock poisoned");
        for worker_id in 0..self.num_workers {
            let ctx = WorkerContext {
                broker: Arc::clone(&self.broker),
                metrics: Arc::clone(&self.metrics),
                idempotency: Arc::clone(&self.idempotency),
                processor: Arc::clone(&self.processor),
                dedupe: Arc::clone(&self.dedupe),
                last_seq_by_key: Arc::clone(&self.last_seq_by_key),
                running: Arc::clone(&self.running),
                idle_ms: self.poll_interval_ms.max(1),
            };
            handles.push(tokio::spawn(async move {
                ctx.run(worker_id).await;
            }));
        }
        info!("{} consumer worker(s) started", self.num_workers);
    }

    /// Signal the workers to stop and join them with a bounded timeout;
    /// outstanding work past the deadline is dropped.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().expect("consumer handles lock poisoned");
            guard.drain(..).collect()
        };
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await.is_err() {
                warn!("consumer worker did not stop within the shutdown timeout");
                handle.abort();
            }
        }
        info!("consumer workers stopped");
    }

    /// Clear the dedup window and the per-key order map (metrics reset,
    /// scope=all).
    pub fn reset_consistency_windows(&self) {
        self.dedupe.clear();
        self.last_seq_by_key.clear();
    }
}

struct WorkerContext {
    broker: Arc<Broker>,
    metrics: Arc<MetricsRecorder>,
    idempotency: Arc<IdempotencyStore>,
    processor: Arc<dyn Processor>,
    dedupe: Arc<DedupeWindow>,
    last_seq_by_key: Arc<DashMap<String, u64>>,
    running: Arc<AtomicBool>,
    idle_ms: u64,
}

impl WorkerContext {
    async fn run(&self, worker_id: usize) {
        debug!("consumer worker {} entering loop", worker_id);
        while self.running.load(Ordering::SeqCst) {
            let Some(msg) = self.broker.poll(POLL_WAIT_MS).await else {
                tokio::time::sleep(Duration::from_millis(self.idle_ms)).await;
                continue;
            };
            self.handle(msg);
        }
        debug!("consumer worker {} exiting", worker_id);
    }

    /// One message, one uncommitted decrement: every branch below ends in
    /// exactly one `dec_uncommitted`.
    fn handle(&self, msg: Message) {
        let latency = epoch_ms().saturating_sub(msg.timestamp);

        if !self.dedupe.check_and_remember(&msg.id) {
            warn!("dropping duplicate id={}", msg.id);
            self.metrics.record_duplicate();
            self.metrics.dec_uncommitted();
            return;
        }

        self.check_order_violation(&msg);

        match self.processor.process(&msg) {
            Ok(()) => {
                self.metrics.record_success(latency);
                // Release the ID so a replay after reset can re-admit it.
                self.idempotency.remove_processed(&msg.id);
                self.metrics.dec_uncommitted();
            }
            Err(e) => {
                error!("processing failed id={} err={}", msg.id, e);
                self.metrics.record_failure();
                self.metrics.dec_uncommitted();
            }
        }
    }

    /// Per-key monotonicity check: a sequence at or below the key's recorded
    /// maximum is a violation. The map keeps the maximum either way and is
    /// never shrunk during a run.
    fn check_order_violation(&self, msg: &Message) {
        let (Some(key), Some(seq)) = (msg.key.as_ref(), msg.sequence) else {
            return;
        };

        match self.last_seq_by_key.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let prev = *entry.get();
                if seq <= prev {
                    warn!(
                        "order violation key={} prev={} curr={}",
                        key, prev, seq
                    );
                    self.metrics.record_order_violation();
                }
                entry.insert(prev.max(seq));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(seq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::dlq::DeadLetterQueue;
    use crate::queue::MessageQueue;
    use crate::replication::ReplicationClient;
    use crate::wal::WalAppender;
    use crate::MymqError;
    use tempfile::tempdir;

    struct FailingProcessor;

    impl Processor for FailingProcessor {
        fn process(&self, _msg: &Message) -> Result<()> {
            Err(MymqError::Queue("simulated processing failure".to_string()))
        }
    }

    fn test_rig(
        processor: Arc<dyn Processor>,
        workers: usize,
    ) -> (Arc<Broker>, Arc<MetricsRecorder>, ConsumerPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let metrics = Arc::new(MetricsRecorder::new());
        let idempotency = Arc::new(IdempotencyStore::default());
        let broker = Arc::new(Broker::new(
            MessageQueue::new(1024),
            DeadLetterQueue::new(64, Arc::clone(&metrics)),
            WalAppender::new(dir.path().join("wal.log")).unwrap(),
            Arc::clone(&idempotency),
            Arc::clone(&metrics),
            ClusterConfig::default(),
            ReplicationClient::new().unwrap(),
        ));
        let pool = ConsumerPool::new(
            Arc::clone(&broker),
            Arc::clone(&metrics),
            idempotency,
            processor,
            workers,
            1,
        );
        (broker, metrics, pool, dir)
    }

    async fn wait_for_drain(metrics: &MetricsRecorder, expected_total: u64) {
        for _ in 0..200 {
            if metrics.snapshot().total_messages >= expected_total {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pipeline did not drain to {expected_total} messages in time");
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_balance_uncommitted() {
        let (broker, metrics, pool, _dir) = test_rig(Arc::new(LogProcessor), 2);
        pool.start();

        for i in 0..50 {
            assert!(broker.enqueue_from_peer(Message::new(format!("m-{i}"))).await.is_accepted());
        }

        wait_for_drain(&metrics, 50).await;
        pool.shutdown().await;

        let dto = metrics.snapshot();
        assert_eq!(dto.success_count, 50);
        assert_eq!(dto.fail_count, 0);
        assert_eq!(dto.uncommitted_count, 0);
        assert_eq!(dto.duplicate_count, 0);
    }

    #[tokio::test]
    async fn test_processing_failure_counts_and_releases_uncommitted() {
        let (broker, metrics, pool, _dir) = test_rig(Arc::new(FailingProcessor), 1);
        pool.start();

        for i in 0..10 {
            assert!(broker.enqueue_from_peer(Message::new(format!("m-{i}"))).await.is_accepted());
        }

        wait_for_drain(&metrics, 10).await;
        pool.shutdown().await;

        let dto = metrics.snapshot();
        assert_eq!(dto.fail_count, 10);
        assert_eq!(dto.success_count, 0);
        assert_eq!(dto.uncommitted_count, 0);
    }

    #[tokio::test]
    async fn test_post_admission_dedup_drops_second_copy() {
        let (broker, metrics, pool, _dir) = test_rig(Arc::new(LogProcessor), 1);
        pool.start();

        // First copy processes and releases the admission-time ID, so the
        // second copy is only caught by the consumer-side window.
        let msg = Message::new("dup-payload");
        let copy = msg.clone();
        assert!(broker.enqueue_from_peer(msg).await.is_accepted());
        wait_for_drain(&metrics, 1).await;
        // The uncommitted decrement follows the idempotency release, so a
        // zero gauge means the ID is free for re-admission.
        for _ in 0..200 {
            if metrics.uncommitted() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(broker.enqueue_from_peer(copy).await.is_accepted());
        wait_for_drain(&metrics, 1).await;
        // Give the duplicate time to be polled and dropped.
        for _ in 0..200 {
            if metrics.snapshot().duplicate_count >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown().await;

        let dto = metrics.snapshot();
        assert_eq!(dto.success_count, 1);
        assert_eq!(dto.duplicate_count, 1);
        assert_eq!(dto.uncommitted_count, 0);
    }

    #[tokio::test]
    async fn test_order_violation_detected_once() {
        let (broker, metrics, pool, _dir) = test_rig(Arc::new(LogProcessor), 1);

        // Enqueue everything before starting the single worker so arrival
        // order is deterministic: 1,2,3,5,4,6 on one key.
        for seq in [1u64, 2, 3, 5, 4, 6] {
            let msg = Message::new(format!("p-{seq}"))
                .with_key("k")
                .with_sequence(seq);
            assert!(broker.enqueue_from_peer(msg).await.is_accepted());
        }

        pool.start();
        wait_for_drain(&metrics, 6).await;
        pool.shutdown().await;

        let dto = metrics.snapshot();
        assert_eq!(dto.order_violation_count, 1);
        assert_eq!(dto.success_count, 6);
        assert_eq!(dto.uncommitted_count, 0);
    }

    #[tokio::test]
    async fn test_messages_without_key_skip_order_check() {
        let (broker, metrics, pool, _dir) = test_rig(Arc::new(LogProcessor), 1);
        pool.start();

        for _ in 0..5 {
            assert!(broker.enqueue_from_peer(Message::new("no-key")).await.is_accepted());
        }
        wait_for_drain(&metrics, 5).await;
        pool.shutdown().await;

        assert_eq!(metrics.snapshot().order_violation_count, 0);
    }

    #[tokio::test]
    async fn test_reset_consistency_windows_allows_same_sequence_again() {
        let (broker, metrics, pool, _dir) = test_rig(Arc::new(LogProcessor), 1);
        pool.start();

        let first = Message::new("a").with_key("k").with_sequence(5);
        assert!(broker.enqueue_from_peer(first).await.is_accepted());
        wait_for_drain(&metrics, 1).await;

        pool.reset_consistency_windows();
        metrics.reset_all();

        let again = Message::new("b").with_key("k").with_sequence(5);
        assert!(broker.enqueue_from_peer(again).await.is_accepted());
        wait_for_drain(&metrics, 1).await;
        pool.shutdown().await;

        assert_eq!(metrics.snapshot().order_violation_count, 0);
    }

    #[test]
    fn test_dedupe_window_evicts_oldest() {
        let window = DedupeWindow::new(3);
        assert!(window.check_and_remember("a"));
        assert!(window.check_and_remember("b"));
        assert!(window.check_and_remember("c"));
        assert!(!window.check_and_remember("a"));

        // "d" evicts "a"; "a" becomes admissible again.
        assert!(window.check_and_remember("d"));
        assert!(window.check_and_remember("a"));
        // "b" was evicted by the reinsertion of "a".
        assert!(window.check_and_remember("b"));
    }
}
