//! Running delivery statistics.
//!
//! Counters are atomics; delivery durations feed a bounded ring buffer
//! (1000 samples, oldest evicted) from which moving percentiles are
//! computed on demand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Ring buffer capacity for duration samples
const SAMPLE_CAPACITY: usize = 1_000;

/// Shared pipeline counters and duration samples.
#[derive(Debug, Default)]
pub struct RelayStats {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed_attempts: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
    durations_ms: Mutex<VecDeque<f64>>,
}

/// Point-in-time copy of the statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Items accepted by the queue
    pub enqueued: u64,
    /// Deliveries that completed successfully
    pub completed: u64,
    /// Failed attempts (every failure, including retried ones)
    pub failed_attempts: u64,
    /// Reschedules performed
    pub retried: u64,
    /// Deliveries moved to the dead-letter queue
    pub dead_lettered: u64,
    /// Items rejected or dropped at enqueue time
    pub dropped: u64,
    /// Median delivery duration in milliseconds
    pub p50_duration_ms: Option<f64>,
    /// 95th percentile delivery duration in milliseconds
    pub p95_duration_ms: Option<f64>,
    /// 99th percentile delivery duration in milliseconds
    pub p99_duration_ms: Option<f64>,
}

impl RelayStats {
    /// Create zeroed statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted enqueue.
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed delivery.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed attempt.
    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a reschedule.
    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dead-lettered delivery.
    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected or dropped item.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a delivery duration sample, evicting the oldest at capacity.
    pub fn record_duration(&self, duration_ms: f64) {
        let mut samples = self.durations_ms.lock();
        if samples.len() == SAMPLE_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(duration_ms);
    }

    /// Copy the counters and compute moving percentiles.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut sorted: Vec<f64> = self.durations_ms.lock().iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            p50_duration_ms: percentile(&sorted, 0.50),
            p95_duration_ms: percentile(&sorted, 0.95),
            p99_duration_ms: percentile(&sorted, 0.99),
        }
    }
}

/// Nearest-rank percentile over a sorted sample set.
fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    Some(sorted[rank - 1])
}
