//! In-process metrics: independent atomic counters, read as
//! eventually-consistent snapshots.
//!
//! `AtomicMetrics` is the default `MetricsSink`.  Deployments that ship
//! metrics elsewhere implement the trait against their own registry; the
//! pipeline never depends on this concrete type.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use custos_core::traits::MetricsSink;

/// Health thresholds, matching the operational limits the pipeline was
/// tuned for: a burst of storage errors, a sustained failure rate, or a
/// queue near the default capacity all flip the health flag.
const HEALTHY_MAX_STORAGE_ERRORS: u64 = 10;
const HEALTHY_MAX_ERROR_RATE: f64 = 0.05;
const HEALTHY_MAX_QUEUE_SIZE: usize = 10_000;

/// Atomic-counter implementation of `MetricsSink`.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    total_events: AtomicU64,
    success_events: AtomicU64,
    failure_events: AtomicU64,
    critical_events: AtomicU64,
    dropped_events: AtomicU64,
    storage_errors: AtomicU64,
    batches: AtomicU64,
    batch_entries: AtomicU64,
    total_latency_ms: AtomicU64,
    current_queue_size: AtomicUsize,
    max_queue_size: AtomicUsize,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_events(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    pub fn success_events(&self) -> u64 {
        self.success_events.load(Ordering::Relaxed)
    }

    pub fn failure_events(&self) -> u64 {
        self.failure_events.load(Ordering::Relaxed)
    }

    pub fn critical_events(&self) -> u64 {
        self.critical_events.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn storage_errors(&self) -> u64 {
        self.storage_errors.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn batch_entries(&self) -> u64 {
        self.batch_entries.load(Ordering::Relaxed)
    }

    pub fn current_queue_size(&self) -> usize {
        self.current_queue_size.load(Ordering::Relaxed)
    }

    /// High-water mark of queue occupancy since start.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size.load(Ordering::Relaxed)
    }

    /// Fraction of record() calls that failed; 0.0 before any call.
    pub fn error_rate(&self) -> f64 {
        let success = self.success_events();
        let failure = self.failure_events();
        let total = success + failure;
        if total == 0 {
            0.0
        } else {
            failure as f64 / total as f64
        }
    }

    /// Mean record() latency in milliseconds over successful calls.
    pub fn mean_latency_ms(&self) -> f64 {
        let success = self.success_events();
        if success == 0 {
            0.0
        } else {
            self.total_latency_ms.load(Ordering::Relaxed) as f64 / success as f64
        }
    }

    /// A one-block operator summary of the key counters.
    pub fn summary(&self) -> String {
        format!(
            "audit metrics: total {}, success {}, failure {}, critical {}, \
             dropped {}, error rate {:.2}%, storage errors {}, batches {} \
             ({} entries), queue {}/{} (max)",
            self.total_events(),
            self.success_events(),
            self.failure_events(),
            self.critical_events(),
            self.dropped_events(),
            self.error_rate() * 100.0,
            self.storage_errors(),
            self.batches(),
            self.batch_entries(),
            self.current_queue_size(),
            self.max_queue_size(),
        )
    }
}

impl MetricsSink for AtomicMetrics {
    fn record_success(&self, elapsed_ms: u64) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.success_events.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    fn record_failure(&self, _kind: &str) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.failure_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_critical(&self) {
        self.critical_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch(&self, size: usize, _elapsed_ms: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.batch_entries.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn update_queue_size(&self, size: usize) {
        self.current_queue_size.store(size, Ordering::Relaxed);
        self.max_queue_size.fetch_max(size, Ordering::Relaxed);
    }

    fn is_healthy(&self) -> bool {
        self.storage_errors() < HEALTHY_MAX_STORAGE_ERRORS
            && self.error_rate() < HEALTHY_MAX_ERROR_RATE
            && self.current_queue_size() < HEALTHY_MAX_QUEUE_SIZE
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = AtomicMetrics::new();
        metrics.record_success(10);
        metrics.record_success(20);
        metrics.record_failure("sign");
        metrics.record_drop();
        metrics.record_critical();
        metrics.record_batch(5, 7);

        assert_eq!(metrics.total_events(), 3);
        assert_eq!(metrics.success_events(), 2);
        assert_eq!(metrics.failure_events(), 1);
        assert_eq!(metrics.dropped_events(), 1);
        assert_eq!(metrics.critical_events(), 1);
        assert_eq!(metrics.batches(), 1);
        assert_eq!(metrics.batch_entries(), 5);
        assert!((metrics.mean_latency_ms() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn queue_gauge_tracks_high_water_mark() {
        let metrics = AtomicMetrics::new();
        metrics.update_queue_size(10);
        metrics.update_queue_size(50);
        metrics.update_queue_size(3);

        assert_eq!(metrics.current_queue_size(), 3);
        assert_eq!(metrics.max_queue_size(), 50);
    }

    #[test]
    fn fresh_metrics_are_healthy() {
        assert!(AtomicMetrics::new().is_healthy());
    }

    #[test]
    fn storage_error_burst_flips_health() {
        let metrics = AtomicMetrics::new();
        for _ in 0..HEALTHY_MAX_STORAGE_ERRORS {
            metrics.record_storage_error();
        }
        assert!(!metrics.is_healthy());
    }

    #[test]
    fn sustained_failure_rate_flips_health() {
        let metrics = AtomicMetrics::new();
        for _ in 0..90 {
            metrics.record_success(1);
        }
        for _ in 0..10 {
            metrics.record_failure("queue-full");
        }
        // 10% failure rate is above the 5% threshold.
        assert!(!metrics.is_healthy());
    }

    #[test]
    fn summary_mentions_key_counters() {
        let metrics = AtomicMetrics::new();
        metrics.record_success(1);
        metrics.record_drop();
        let summary = metrics.summary();
        assert!(summary.contains("success 1"));
        assert!(summary.contains("dropped 1"));
    }
}
