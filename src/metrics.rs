//! # MyMQ Metrics Collection
//!
//! Lock-free metrics recorder for the broker pipeline. Counters are plain
//! atomics updated from the hot path with relaxed ordering; the only locked
//! structure is the time-indexed sliding window used by the dashboard charts.
//!
//! Two latency containers are maintained:
//!
//! - A fixed-size ring of the most recent [`LAT_BUF_SIZE`] samples, written
//!   through a monotonically increasing atomic index so concurrent writers
//!   never block each other. Readers may observe a torn interleaving of
//!   samples while the ring wraps; that is acceptable for percentile
//!   estimation.
//! - A deque of `(event_ts, latency_ms)` pairs guarded by a single mutex,
//!   pruned against `now - window_ms` on every windowed read.
//!
//! Percentiles use the nearest-rank approximation: sort the populated sample,
//! take index `max(0, floor(n * q) - 1)`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Number of latency samples retained for cumulative percentile estimation.
pub const LAT_BUF_SIZE: usize = 10_000;

/// Thread-safe recorder for one broker under measurement.
///
/// One instance exists per measured system (MyMQ itself plus the external
/// broker it is compared against); collaborators receive it explicitly, never
/// through ambient globals.
#[derive(Debug)]
pub struct MetricsRecorder {
    total_messages: AtomicU64,
    success_messages: AtomicU64,
    fail_messages: AtomicU64,

    total_latency: AtomicU64,
    latency_samples: AtomicU64,
    /// Running average, stored as `f64` bits.
    avg_latency_bits: AtomicU64,

    latency_ring: Box<[AtomicU64]>,
    ring_idx: AtomicUsize,

    duplicate_count: AtomicU64,
    order_violation_count: AtomicU64,

    /// Admitted-but-unconsumed gauge. Signed: transient negatives indicate an
    /// upstream balance bug and are logged, not fatal.
    uncommitted_count: AtomicI64,
    dlq_count: AtomicU64,

    recovery_time_ms: AtomicU64,
    recovered_messages: AtomicU64,

    window: Mutex<VecDeque<(u64, u64)>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let ring: Vec<AtomicU64> = (0..LAT_BUF_SIZE).map(|_| AtomicU64::new(0)).collect();
        Self {
            total_messages: AtomicU64::new(0),
            success_messages: AtomicU64::new(0),
            fail_messages: AtomicU64::new(0),
            total_latency: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            avg_latency_bits: AtomicU64::new(0f64.to_bits()),
            latency_ring: ring.into_boxed_slice(),
            ring_idx: AtomicUsize::new(0),
            duplicate_count: AtomicU64::new(0),
            order_violation_count: AtomicU64::new(0),
            uncommitted_count: AtomicI64::new(0),
            dlq_count: AtomicU64::new(0),
            recovery_time_ms: AtomicU64::new(0),
            recovered_messages: AtomicU64::new(0),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one successfully processed message and its end-to-end latency.
    pub fn record_success(&self, latency_ms: u64) {
        let now = crate::message::epoch_ms();

        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.success_messages.fetch_add(1, Ordering::Relaxed);

        let total = self.total_latency.fetch_add(latency_ms, Ordering::Relaxed) + latency_ms;
        let samples = self.latency_samples.fetch_add(1, Ordering::Relaxed) + 1;
        self.avg_latency_bits
            .store((total as f64 / samples as f64).to_bits(), Ordering::Relaxed);

        let idx = self.ring_idx.fetch_add(1, Ordering::Relaxed);
        self.latency_ring[idx % LAT_BUF_SIZE].store(latency_ms, Ordering::Relaxed);

        let mut window = self.window.lock().expect("latency window lock poisoned");
        window.push_back((now, latency_ms));
    }

    pub fn record_failure(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.fail_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_order_violation(&self) {
        self.order_violation_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dlq(&self) {
        self.dlq_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_uncommitted(&self) {
        self.uncommitted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_uncommitted(&self) {
        let after = self.uncommitted_count.fetch_sub(1, Ordering::Relaxed) - 1;
        if after < 0 {
            warn!("uncommitted count dropped below zero ({})", after);
        }
    }

    pub fn record_recovery_time(&self, ms: u64) {
        self.recovery_time_ms.store(ms, Ordering::Relaxed);
    }

    pub fn record_recovery_message(&self) {
        self.recovered_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn uncommitted(&self) -> i64 {
        self.uncommitted_count.load(Ordering::Relaxed)
    }

    /// Cumulative snapshot: counters plus avg/p95/p99 over the latency ring.
    pub fn snapshot(&self) -> MetricsDto {
        let n = (self.latency_samples.load(Ordering::Relaxed) as usize).min(LAT_BUF_SIZE);
        let mut sample: Vec<u64> = self.latency_ring[..n]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect();
        sample.sort_unstable();

        MetricsDto {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            success_count: self.success_messages.load(Ordering::Relaxed),
            fail_count: self.fail_messages.load(Ordering::Relaxed),
            avg_latency_ms: f64::from_bits(self.avg_latency_bits.load(Ordering::Relaxed)),
            p95_latency_ms: nearest_rank(&sample, 0.95),
            p99_latency_ms: nearest_rank(&sample, 0.99),
            duplicate_count: self.duplicate_count.load(Ordering::Relaxed),
            order_violation_count: self.order_violation_count.load(Ordering::Relaxed),
            uncommitted_count: self.uncommitted_count.load(Ordering::Relaxed),
            dlq_count: self.dlq_count.load(Ordering::Relaxed),
            recovery_time_ms: self.recovery_time_ms.load(Ordering::Relaxed),
            recovered_messages: self.recovered_messages.load(Ordering::Relaxed),
        }
    }

    /// Snapshot over samples observed within the last `window_ms`
    /// milliseconds. Prunes expired entries as a side effect; counter fields
    /// stay cumulative so the dashboard can mix both views.
    pub fn window_snapshot(&self, window_ms: u64) -> MetricsDto {
        let limit = crate::message::epoch_ms().saturating_sub(window_ms.max(1));

        let sample: Vec<u64> = {
            let mut window = self.window.lock().expect("latency window lock poisoned");
            while window.front().is_some_and(|(ts, _)| *ts < limit) {
                window.pop_front();
            }
            window.iter().map(|(_, lat)| *lat).collect()
        };

        let mut dto = self.snapshot();
        if sample.is_empty() {
            dto.avg_latency_ms = 0.0;
            dto.p95_latency_ms = 0.0;
            dto.p99_latency_ms = 0.0;
        } else {
            let sum: u64 = sample.iter().sum();
            dto.avg_latency_ms = sum as f64 / sample.len() as f64;
            let mut sorted = sample;
            sorted.sort_unstable();
            dto.p95_latency_ms = nearest_rank(&sorted, 0.95);
            dto.p99_latency_ms = nearest_rank(&sorted, 0.99);
        }
        dto
    }

    /// Zero every counter, the latency ring, and the window deque.
    pub fn reset_all(&self) {
        self.total_messages.store(0, Ordering::Relaxed);
        self.success_messages.store(0, Ordering::Relaxed);
        self.fail_messages.store(0, Ordering::Relaxed);
        self.duplicate_count.store(0, Ordering::Relaxed);
        self.order_violation_count.store(0, Ordering::Relaxed);
        self.uncommitted_count.store(0, Ordering::Relaxed);
        self.dlq_count.store(0, Ordering::Relaxed);
        self.recovery_time_ms.store(0, Ordering::Relaxed);
        self.recovered_messages.store(0, Ordering::Relaxed);
        self.reset_latency_window();
    }

    /// Clear latency state only: ring, running average, and window deque.
    pub fn reset_latency_window(&self) {
        self.total_latency.store(0, Ordering::Relaxed);
        self.latency_samples.store(0, Ordering::Relaxed);
        self.avg_latency_bits.store(0f64.to_bits(), Ordering::Relaxed);
        for slot in self.latency_ring.iter() {
            slot.store(0, Ordering::Relaxed);
        }
        self.ring_idx.store(0, Ordering::Relaxed);
        self.window
            .lock()
            .expect("latency window lock poisoned")
            .clear();
    }
}

/// Nearest-rank percentile over an ascending-sorted sample: element at index
/// `max(0, floor(n * q) - 1)`, or 0.0 for an empty sample.
fn nearest_rank(sorted: &[u64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let idx = ((n as f64 * q).floor() as usize).saturating_sub(1);
    sorted[idx] as f64
}

/// Snapshot DTO served to the dashboard; field names match the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDto {
    pub total_messages: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub duplicate_count: u64,
    pub order_violation_count: u64,
    pub uncommitted_count: i64,
    pub dlq_count: u64,
    pub recovery_time_ms: u64,
    pub recovered_messages: u64,
}
