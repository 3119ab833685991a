//! In-process decision and load counters
//!
//! Recording never blocks: counters are atomics and latency samples go into
//! a fixed ring of atomic slots. Percentiles are computed from the ring only
//! when a snapshot is taken.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::Effect;

/// Snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineMetrics {
    /// Total number of decisions produced
    pub total_decisions: u64,

    pub permit_decisions: u64,
    pub deny_decisions: u64,
    pub not_applicable_decisions: u64,
    pub indeterminate_decisions: u64,

    /// Policy documents published
    pub loads_succeeded: u64,

    /// Policy documents rejected
    pub loads_failed: u64,

    /// Latency percentiles over the recent sample window
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Share of decisions that were Indeterminate
    pub fn indeterminate_rate(&self) -> f64 {
        if self.total_decisions == 0 {
            0.0
        } else {
            self.indeterminate_decisions as f64 / self.total_decisions as f64
        }
    }

    /// Share of Permit among firm decisions
    pub fn permit_rate(&self) -> f64 {
        let total = self.permit_decisions + self.deny_decisions;
        if total == 0 {
            0.0
        } else {
            self.permit_decisions as f64 / total as f64
        }
    }
}

/// Most recent latency samples in nanoseconds
///
/// A slot is overwritten once the ring wraps around. Concurrent writers may
/// race for the same slot; the window stays approximate, never blocking.
struct LatencyWindow {
    slots: Box<[AtomicU64]>,
    next: AtomicUsize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| AtomicU64::new(0)).collect(),
            next: AtomicUsize::new(0),
        }
    }

    fn observe(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.slots[slot].store(nanos, Ordering::Relaxed);
    }

    /// Recorded samples in milliseconds, sorted ascending
    fn sorted_ms(&self) -> Vec<f64> {
        let filled = self.next.load(Ordering::Relaxed).min(self.slots.len());
        let mut samples: Vec<f64> = self.slots[..filled]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed) as f64 / 1_000_000.0)
            .collect();
        samples.sort_by(|a, b| a.total_cmp(b));
        samples
    }

    fn clear(&self) {
        self.next.store(0, Ordering::Relaxed);
    }
}

/// Metrics collector shared by every evaluation of a store
pub struct MetricsCollector {
    permit: AtomicU64,
    deny: AtomicU64,
    not_applicable: AtomicU64,
    indeterminate: AtomicU64,
    loads_succeeded: AtomicU64,
    loads_failed: AtomicU64,
    latency: LatencyWindow,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(10_000)
    }

    /// Collector keeping the latest `max_samples` latency samples
    pub fn with_window(max_samples: usize) -> Self {
        Self {
            permit: AtomicU64::new(0),
            deny: AtomicU64::new(0),
            not_applicable: AtomicU64::new(0),
            indeterminate: AtomicU64::new(0),
            loads_succeeded: AtomicU64::new(0),
            loads_failed: AtomicU64::new(0),
            latency: LatencyWindow::new(max_samples),
        }
    }

    /// Record a decision and how long it took
    pub fn record_decision(&self, effect: Effect, latency: Duration) {
        let counter = match effect {
            Effect::Permit => &self.permit,
            Effect::Deny => &self.deny,
            Effect::NotApplicable => &self.not_applicable,
            Effect::Indeterminate => &self.indeterminate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.latency.observe(latency);
    }

    pub fn record_load(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.loads_succeeded
        } else {
            &self.loads_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current metrics snapshot
    pub fn get_metrics(&self) -> EngineMetrics {
        let permit_decisions = self.permit.load(Ordering::Relaxed);
        let deny_decisions = self.deny.load(Ordering::Relaxed);
        let not_applicable_decisions = self.not_applicable.load(Ordering::Relaxed);
        let indeterminate_decisions = self.indeterminate.load(Ordering::Relaxed);

        let sorted = self.latency.sorted_ms();
        let avg_latency_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        EngineMetrics {
            total_decisions: permit_decisions
                + deny_decisions
                + not_applicable_decisions
                + indeterminate_decisions,
            permit_decisions,
            deny_decisions,
            not_applicable_decisions,
            indeterminate_decisions,
            loads_succeeded: self.loads_succeeded.load(Ordering::Relaxed),
            loads_failed: self.loads_failed.load(Ordering::Relaxed),
            latency_p50_ms: Self::percentile(&sorted, 0.50),
            latency_p90_ms: Self::percentile(&sorted, 0.90),
            latency_p99_ms: Self::percentile(&sorted, 0.99),
            avg_latency_ms,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.permit,
            &self.deny,
            &self.not_applicable,
            &self.indeterminate,
            &self.loads_succeeded,
            &self.loads_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.latency.clear();
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_metrics_creation() {
        let collector = MetricsCollector::new();
        let metrics = collector.get_metrics();

        assert_eq!(metrics.total_decisions, 0);
        assert_eq!(metrics.loads_succeeded, 0);
        assert_eq!(metrics.latency_p99_ms, 0.0);
    }

    #[test]
    fn test_record_decision() {
        let collector = MetricsCollector::new();

        collector.record_decision(Effect::Permit, Duration::from_millis(1));
        collector.record_decision(Effect::Deny, Duration::from_millis(1));
        collector.record_decision(Effect::Permit, Duration::from_millis(1));
        collector.record_decision(Effect::Indeterminate, Duration::from_millis(1));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_decisions, 4);
        assert_eq!(metrics.permit_decisions, 2);
        assert_eq!(metrics.deny_decisions, 1);
        assert!((metrics.permit_rate() - 0.666).abs() < 0.01);
        assert!((metrics.indeterminate_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_latency() {
        let collector = MetricsCollector::new();

        for ms in [5, 10, 15] {
            collector.record_decision(Effect::NotApplicable, Duration::from_millis(ms));
        }

        let metrics = collector.get_metrics();
        assert!((metrics.avg_latency_ms - 10.0).abs() < 1e-9);
        assert_eq!(metrics.latency_p50_ms, 10.0);
        assert_eq!(metrics.latency_p99_ms, 15.0);
    }

    #[test]
    fn test_latency_window_keeps_latest() {
        let collector = MetricsCollector::with_window(20);
        for _ in 0..100 {
            collector.record_decision(Effect::Deny, Duration::from_millis(50));
        }
        for _ in 0..20 {
            collector.record_decision(Effect::Deny, Duration::from_millis(1));
        }

        assert_eq!(collector.latency.sorted_ms().len(), 20);
        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_decisions, 120);
        assert_eq!(metrics.latency_p99_ms, 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recording() {
        let collector = Arc::new(MetricsCollector::with_window(64));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                tokio::spawn(async move {
                    for _ in 0..1_000 {
                        collector.record_decision(Effect::Permit, Duration::from_micros(5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.permit_decisions, 8_000);
        assert!(metrics.latency_p50_ms > 0.0);
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();

        collector.record_decision(Effect::Permit, Duration::from_millis(1));
        collector.record_load(false);

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_decisions, 0);
        assert_eq!(metrics.loads_failed, 0);
        assert_eq!(metrics.avg_latency_ms, 0.0);
    }
}
