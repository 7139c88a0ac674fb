//! Bounded event queue: a `VecDeque` behind a `tokio::sync::Mutex`
//! (never held across an `.await` beyond the deque operations themselves),
//! with a `Notify` so `get_batch` parks instead of busy-polling while
//! empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant as TokioInstant;

use crate::message::EventEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropOldest,
    RejectNew,
    AdaptiveRateLimit,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::RejectNew
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    RateLimited,
}

pub(crate) struct QueueItem {
    pub event: EventEnvelope,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub capacity: usize,
    pub high_water_mark_ratio: f64,
    pub low_water_mark_ratio: f64,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            high_water_mark_ratio: 0.8,
            low_water_mark_ratio: 0.5,
            overflow_policy: OverflowPolicy::RejectNew,
        }
    }
}

/// Gauges the queue itself needs to report back to the metrics collector.
/// `Bus` wires these into `MetricsCollector` on every admission/drain; kept
/// here rather than a circular dependency on the collector type.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueGaugeDelta {
    pub queue_size: usize,
    pub backpressure_active: bool,
}

pub struct BoundedEventQueue {
    config: QueueConfig,
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
    sequence: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    /// `f64` bit pattern for the adaptive-rate-limit acceptance probability,
    /// clamped to `[0.01, 1.0]`. A single process-wide multiplier, matching
    /// the source's global (not per-producer) backoff.
    acceptance_rate_bits: AtomicU64,
    backpressure_active: std::sync::atomic::AtomicBool,
}

impl BoundedEventQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            items: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            acceptance_rate_bits: AtomicU64::new(1.0f64.to_bits()),
            backpressure_active: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn events_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn acceptance_rate(&self) -> f64 {
        f64::from_bits(self.acceptance_rate_bits.load(Ordering::Relaxed))
    }

    fn adjust_acceptance_rate(&self, factor: f64) {
        loop {
            let current_bits = self.acceptance_rate_bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let updated = (current * factor).clamp(0.01, 1.0);
            if self
                .acceptance_rate_bits
                .compare_exchange_weak(
                    current_bits,
                    updated.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    fn high_water_mark(&self) -> usize {
        (self.config.capacity as f64 * self.config.high_water_mark_ratio) as usize
    }

    fn low_water_mark(&self) -> usize {
        (self.config.capacity as f64 * self.config.low_water_mark_ratio) as usize
    }

    fn update_backpressure_gauge(&self, size: usize) {
        let high = self.high_water_mark();
        let low = self.low_water_mark();
        if size >= high {
            self.backpressure_active.store(true, Ordering::Relaxed);
        } else if size <= low {
            self.backpressure_active.store(false, Ordering::Relaxed);
        }
    }

    pub fn backpressure_active(&self) -> bool {
        self.backpressure_active.load(Ordering::Relaxed)
    }

    pub async fn put(&self, event: EventEnvelope) -> PutOutcome {
        match self.config.overflow_policy {
            OverflowPolicy::RejectNew => {
                let mut items = self.items.lock().await;
                if items.len() >= self.config.capacity {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return PutOutcome::Rejected(RejectReason::QueueFull);
                }
                self.push_locked(&mut items, event);
                PutOutcome::Accepted
            }
            OverflowPolicy::DropOldest => {
                let mut items = self.items.lock().await;
                if items.len() >= self.config.capacity {
                    items.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                self.push_locked(&mut items, event);
                PutOutcome::Accepted
            }
            OverflowPolicy::AdaptiveRateLimit => {
                let rate = self.acceptance_rate();
                if rate < 1.0 && fastrand::f64() > rate {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    self.adjust_acceptance_rate(0.67);
                    return PutOutcome::Rejected(RejectReason::RateLimited);
                }
                let mut items = self.items.lock().await;
                if items.len() >= self.config.capacity {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    self.adjust_acceptance_rate(0.67);
                    return PutOutcome::Rejected(RejectReason::QueueFull);
                }
                self.push_locked(&mut items, event);
                let size = items.len();
                drop(items);
                if size <= self.low_water_mark() {
                    self.adjust_acceptance_rate(1.1);
                }
                PutOutcome::Accepted
            }
        }
    }

    fn push_locked(&self, items: &mut VecDeque<QueueItem>, event: EventEnvelope) {
        let sequence_number = self.sequence.fetch_add(1, Ordering::Relaxed);
        items.push_back(QueueItem {
            event,
            sequence_number,
        });
        self.update_backpressure_gauge(items.len());
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.items.try_lock().map(|g| g.len()).unwrap_or(0)
    }

    /// Up to `max_items`, waiting at most `deadline` for the *first* item;
    /// once at least one item is present, drains eagerly without waiting
    /// further. An empty batch (deadline expired with nothing enqueued) is
    /// valid.
    pub async fn get_batch(&self, max_items: usize, deadline: Duration) -> Vec<QueueItem> {
        let deadline_at = TokioInstant::now() + deadline;
        loop {
            {
                let mut items = self.items.lock().await;
                if !items.is_empty() {
                    let n = max_items.min(items.len());
                    let batch: Vec<QueueItem> = items.drain(..n).collect();
                    self.update_backpressure_gauge(items.len());
                    return batch;
                }
            }
            let remaining = deadline_at.saturating_duration_since(TokioInstant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    /// Drains everything immediately, used during graceful shutdown.
    pub async fn drain_all(&self) -> Vec<QueueItem> {
        let mut items = self.items.lock().await;
        let batch: Vec<QueueItem> = items.drain(..).collect();
        self.update_backpressure_gauge(0);
        batch
    }

    pub fn record_shutdown_drop(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }
}
