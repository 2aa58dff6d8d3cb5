//! Worker metrics
//!
//! Counters and latency histograms for every store and handler operation,
//! labelled with the worker name. All updates are lock-free.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Upper bounds of the latency buckets, in milliseconds
const BUCKET_BOUNDS_MS: [u64; 12] = [1, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct LatencyHistogram {
    /// One counter per bound plus an overflow bucket
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    sum_micros: AtomicU64,
    count: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }

    /// Record a latency sample
    pub fn record(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let millis = duration.as_millis() as u64;

        let bucket = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);

        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count)
    }

    pub fn min(&self) -> Duration {
        match self.min_micros.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            min => Duration::from_micros(min),
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_micros.load(Ordering::Relaxed))
    }

    /// Upper bucket bound below which a fraction `p` (0.0 to 1.0) of samples fall
    ///
    /// Samples in the overflow bucket report the observed maximum.
    pub fn percentile(&self, p: f64) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }

        let target = ((count as f64) * p.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                return match BUCKET_BOUNDS_MS.get(i) {
                    Some(bound) => Duration::from_millis(*bound).min(self.max()),
                    None => self.max(),
                };
            }
        }
        self.max()
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean_ms: self.mean().as_secs_f64() * 1000.0,
            min_ms: self.min().as_secs_f64() * 1000.0,
            max_ms: self.max().as_secs_f64() * 1000.0,
            p50_ms: self.percentile(0.50).as_secs_f64() * 1000.0,
            p95_ms: self.percentile(0.95).as_secs_f64() * 1000.0,
            p99_ms: self.percentile(0.99).as_secs_f64() * 1000.0,
        }
    }
}

/// Summary statistics for latency
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Count, error count, and latency of one operation
#[derive(Debug, Default)]
pub struct OperationMetrics {
    count: AtomicU64,
    errors: AtomicU64,
    latency: LatencyHistogram,
}

impl OperationMetrics {
    /// Record one call of the operation
    pub fn observe(&self, elapsed: Duration, ok: bool) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.record(elapsed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            count: self.count(),
            errors: self.errors(),
            latency: self.latency.summary(),
        }
    }
}

/// Point-in-time view of an [`OperationMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct OperationSnapshot {
    pub count: u64,
    pub errors: u64,
    pub latency: LatencySummary,
}

/// Metrics sink for one worker
///
/// Shared between the dequeue loop, the heartbeat loop, and every handler task.
#[derive(Debug)]
pub struct WorkerMetrics {
    name: String,

    pub dequeue: OperationMetrics,
    pub handle: OperationMetrics,
    pub mark_complete: OperationMetrics,
    pub mark_errored: OperationMetrics,
    pub mark_failed: OperationMetrics,
    pub heartbeat: OperationMetrics,

    completed: AtomicU64,
    errored: AtomicU64,
    failed: AtomicU64,
    empty_dequeues: AtomicU64,
    skipped_dequeues: AtomicU64,
    lost_leases: AtomicU64,
    in_flight: AtomicI64,
}

impl WorkerMetrics {
    /// Create metrics labelled with the worker name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dequeue: OperationMetrics::default(),
            handle: OperationMetrics::default(),
            mark_complete: OperationMetrics::default(),
            mark_errored: OperationMetrics::default(),
            mark_failed: OperationMetrics::default(),
            heartbeat: OperationMetrics::default(),
            completed: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            empty_dequeues: AtomicU64::new(0),
            skipped_dequeues: AtomicU64::new(0),
            lost_leases: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_empty_dequeue(&self) {
        self.empty_dequeues.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_dequeue(&self) {
        self.skipped_dequeues.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lost_leases(&self, count: usize) {
        self.lost_leases.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count as i64, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn lost_leases(&self) -> u64 {
        self.lost_leases.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Serializable point-in-time copy of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            name: self.name.clone(),
            dequeue: self.dequeue.snapshot(),
            handle: self.handle.snapshot(),
            mark_complete: self.mark_complete.snapshot(),
            mark_errored: self.mark_errored.snapshot(),
            mark_failed: self.mark_failed.snapshot(),
            heartbeat: self.heartbeat.snapshot(),
            completed: self.completed(),
            errored: self.errored(),
            failed: self.failed(),
            empty_dequeues: self.empty_dequeues.load(Ordering::Relaxed),
            skipped_dequeues: self.skipped_dequeues.load(Ordering::Relaxed),
            lost_leases: self.lost_leases(),
            in_flight: self.in_flight(),
        }
    }
}

/// Point-in-time view of a [`WorkerMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub name: String,
    pub dequeue: OperationSnapshot,
    pub handle: OperationSnapshot,
    pub mark_complete: OperationSnapshot,
    pub mark_errored: OperationSnapshot,
    pub mark_failed: OperationSnapshot,
    pub heartbeat: OperationSnapshot,
    pub completed: u64,
    pub errored: u64,
    pub failed: u64,
    pub empty_dequeues: u64,
    pub skipped_dequeues: u64,
    pub lost_leases: u64,
    pub in_flight: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_empty() {
        let histogram = LatencyHistogram::new();
        assert_eq!(histogram.count(), 0);
        assert_eq!(histogram.mean(), Duration::ZERO);
        assert_eq!(histogram.min(), Duration::ZERO);
        assert_eq!(histogram.percentile(0.99), Duration::ZERO);
    }

    #[test]
    fn test_histogram_statistics() {
        let histogram = LatencyHistogram::new();
        histogram.record(Duration::from_millis(2));
        histogram.record(Duration::from_millis(4));
        histogram.record(Duration::from_millis(30));

        assert_eq!(histogram.count(), 3);
        assert_eq!(histogram.min(), Duration::from_millis(2));
        assert_eq!(histogram.max(), Duration::from_millis(30));
        assert_eq!(histogram.mean(), Duration::from_millis(12));
        assert_eq!(histogram.percentile(0.5), Duration::from_millis(5));
        assert_eq!(histogram.percentile(1.0), Duration::from_millis(30));
    }

    #[test]
    fn test_histogram_overflow_bucket() {
        let histogram = LatencyHistogram::new();
        histogram.record(Duration::from_secs(30));
        assert_eq!(histogram.percentile(0.5), Duration::from_secs(30));
    }

    #[test]
    fn test_operation_metrics() {
        let op = OperationMetrics::default();
        op.observe(Duration::from_millis(1), true);
        op.observe(Duration::from_millis(1), false);

        assert_eq!(op.count(), 2);
        assert_eq!(op.errors(), 1);
        assert_eq!(op.latency().count(), 2);
    }

    #[test]
    fn test_worker_metrics_snapshot() {
        let metrics = WorkerMetrics::new("indexer");
        metrics.record_completed();
        metrics.record_errored();
        metrics.record_lost_leases(2);
        metrics.set_in_flight(3);
        metrics.dequeue.observe(Duration::from_millis(1), true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.name, "indexer");
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.errored, 1);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.lost_leases, 2);
        assert_eq!(snapshot.in_flight, 3);
        assert_eq!(snapshot.dequeue.count, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "indexer");
    }
}
