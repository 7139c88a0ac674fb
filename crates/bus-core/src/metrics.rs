//! Metrics collector: lock-free counters and gauges, per-metric
//! histogram locks only paid on `snapshot()`.
//!
//! Backed by `DashMap`: a metric name plus label never needs a global lock
//! to register, only `entry(..).or_insert_with(..)` on the shard it hashes
//! to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Prometheus-style default bucket boundaries, in seconds.
const BUCKET_BOUNDARIES: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    name: &'static str,
    label: String,
}

#[derive(Default)]
struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: (0..BUCKET_BOUNDARIES.len() + 1).map(|_| AtomicU64::new(0)).collect(),
            sum_bits: AtomicU64::new(0.0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value_seconds: f64) {
        let bucket = BUCKET_BOUNDARIES
            .iter()
            .position(|&boundary| value_seconds <= boundary)
            .unwrap_or(BUCKET_BOUNDARIES.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        loop {
            let current_bits = self.sum_bits.load(Ordering::Relaxed);
            let updated = f64::from_bits(current_bits) + value_seconds;
            if self
                .sum_bits
                .compare_exchange_weak(current_bits, updated.to_bits(), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let total = self.count.load(Ordering::Relaxed);
        let sum = f64::from_bits(self.sum_bits.load(Ordering::Relaxed));
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        HistogramSnapshot {
            count: total,
            sum,
            p50: percentile(&counts, total, 0.50),
            p95: percentile(&counts, total, 0.95),
            p99: percentile(&counts, total, 0.99),
        }
    }
}

/// Linear interpolation within the bucket the target rank falls into.
/// `counts` has `BUCKET_BOUNDARIES.len() + 1` entries, the last being the
/// unbounded overflow bucket (reported as the top boundary, i.e. no
/// interpolation past it).
fn percentile(counts: &[u64], total: u64, quantile: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let target_rank = (total as f64 * quantile).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, &count) in counts.iter().enumerate() {
        let previous_cumulative = cumulative;
        cumulative += count;
        if cumulative >= target_rank && count > 0 {
            let lower_boundary = if i == 0 { 0.0 } else { BUCKET_BOUNDARIES[i - 1] };
            let upper_boundary = BUCKET_BOUNDARIES.get(i).copied().unwrap_or(lower_boundary);
            if upper_boundary <= lower_boundary {
                return lower_boundary;
            }
            let fraction = (target_rank - previous_cumulative) as f64 / count as f64;
            return lower_boundary + fraction * (upper_boundary - lower_boundary);
        }
    }
    BUCKET_BOUNDARIES.last().copied().unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: std::collections::BTreeMap<String, u64>,
    pub gauges: std::collections::BTreeMap<String, i64>,
    pub histograms: std::collections::BTreeMap<String, HistogramSnapshot>,
}

/// Counters/gauges indexed by `(name, label)`, histograms by `(name, label)`
/// separately so the hot path (`counter.fetch_add`) never allocates beyond
/// the first touch of a given label.
#[derive(Default)]
pub struct MetricsCollector {
    counters: DashMap<MetricKey, Arc<AtomicU64>>,
    gauges: DashMap<MetricKey, Arc<std::sync::atomic::AtomicI64>>,
    histograms: DashMap<MetricKey, Arc<Histogram>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, name: &'static str, label: &str) -> Arc<AtomicU64> {
        let key = MetricKey { name, label: label.to_string() };
        self.counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    pub fn incr_counter(&self, name: &'static str, label: &str) {
        self.counter(name, label).fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_counter_by(&self, name: &'static str, label: &str, delta: u64) {
        self.counter(name, label).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &'static str, label: &str, value: i64) {
        let key = MetricKey { name, label: label.to_string() };
        self.gauges
            .entry(key)
            .or_insert_with(|| Arc::new(std::sync::atomic::AtomicI64::new(0)))
            .store(value, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, name: &'static str, label: &str, seconds: f64) {
        let key = MetricKey { name, label: label.to_string() };
        self.histograms
            .entry(key)
            .or_insert_with(|| Arc::new(Histogram::new()))
            .observe(seconds);
    }

    /// Deep-copied, immutable view suitable for any external exporter; no
    /// I/O happens inside the collector itself.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut counters = std::collections::BTreeMap::new();
        for entry in self.counters.iter() {
            counters.insert(
                format!("{}{{{}}}", entry.key().name, entry.key().label),
                entry.value().load(Ordering::Relaxed),
            );
        }
        let mut gauges = std::collections::BTreeMap::new();
        for entry in self.gauges.iter() {
            gauges.insert(
                format!("{}{{{}}}", entry.key().name, entry.key().label),
                entry.value().load(Ordering::Relaxed),
            );
        }
        let mut histograms = std::collections::BTreeMap::new();
        for entry in self.histograms.iter() {
            histograms.insert(
                format!("{}{{{}}}", entry.key().name, entry.key().label),
                entry.value().snapshot(),
            );
        }
        MetricsSnapshot { counters, gauges, histograms }
    }
}

/// Metric name constants.
pub mod names {
    pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
    pub const EVENTS_PROCESSED_TOTAL: &str = "events_processed_total";
    pub const EVENTS_FAILED_TOTAL: &str = "events_failed_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "events_dropped_total";
    pub const EVENTS_REJECTED_TOTAL: &str = "events_rejected_total";
    pub const COMMANDS_SENT_TOTAL: &str = "commands_sent_total";
    pub const COMMANDS_PROCESSED_TOTAL: &str = "commands_processed_total";
    pub const COMMANDS_FAILED_TOTAL: &str = "commands_failed_total";
    pub const OBSERVABILITY_HOOK_ERRORS_TOTAL: &str = "observability_hook_errors_total";

    pub const EVENT_PROCESSING_DURATION_SECONDS: &str = "event_processing_duration_seconds";
    pub const COMMAND_PROCESSING_DURATION_SECONDS: &str = "command_processing_duration_seconds";

    pub const QUEUE_SIZE: &str = "queue_size";
    pub const BACKPRESSURE_ACTIVE: &str = "backpressure_active";
    pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";
    pub const DEAD_LETTER_QUEUE_SIZE: &str = "dead_letter_queue_size";
    pub const ACTIVE_SESSIONS: &str = "active_sessions";
    pub const REGISTERED_HANDLERS: &str = "registered_handlers";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label() {
        let metrics = MetricsCollector::new();
        metrics.incr_counter(names::COMMANDS_SENT_TOTAL, "Foo");
        metrics.incr_counter(names::COMMANDS_SENT_TOTAL, "Foo");
        metrics.incr_counter(names::COMMANDS_SENT_TOTAL, "Bar");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters["commands_sent_total{Foo}"], 2);
        assert_eq!(snapshot.counters["commands_sent_total{Bar}"], 1);
    }

    #[test]
    fn histogram_percentiles_are_monotonic() {
        let metrics = MetricsCollector::new();
        for v in [0.001, 0.002, 0.01, 0.05, 0.2, 1.0, 5.0] {
            metrics.observe_duration(names::COMMAND_PROCESSING_DURATION_SECONDS, "Foo", v);
        }
        let snapshot = metrics.snapshot();
        let h = &snapshot.histograms["command_processing_duration_seconds{Foo}"];
        assert_eq!(h.count, 7);
        assert!(h.p50 <= h.p95);
        assert!(h.p95 <= h.p99);
    }

    #[test]
    fn empty_histogram_reports_zero_percentiles() {
        let h = Histogram::new();
        let s = h.snapshot();
        assert_eq!(s.count, 0);
        assert_eq!(s.p50, 0.0);
    }
}
