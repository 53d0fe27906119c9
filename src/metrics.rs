//! Per-stage counters shared by the workers and the HTTP boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters for one worker stage. Updated with atomic increments so both
/// workers and readers can share it without locking.
#[derive(Debug, Default)]
pub struct StageMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
    busy_micros: AtomicU64,
}

impl StageMetrics {
    /// Records one finished job, successful or not.
    pub fn record(&self, elapsed: Duration, succeeded: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = Duration::from_micros(self.busy_micros.load(Ordering::Relaxed));
        let average = if processed == 0 {
            0.0
        } else {
            total.as_secs_f64() / processed as f64
        };
        StageSnapshot {
            processed,
            failed,
            total_duration_secs: total.as_secs_f64(),
            average_duration_secs: average,
        }
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    pub recordings: StageMetrics,
    pub images: StageMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub total_duration_secs: f64,
    pub average_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub recordings: StageSnapshot,
    pub images: StageSnapshot,
    pub recording_queue_depth: usize,
    pub image_queue_depth: usize,
}
