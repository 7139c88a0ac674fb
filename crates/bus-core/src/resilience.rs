//! Resilience layer: retry with full jitter, per-handler circuit
//! breaker, and a bounded dead letter queue.
//!
//! Breaker state lives behind a plain `std::sync::Mutex` rather than an
//! async lock — no `.await` ever happens while the lock is held (the
//! teacher's design note calls for "per-handler lock; state transitions
//! atomic"; a short synchronous critical section is the natural way to get
//! that in Rust). Breakers are created lazily per handler identity in a
//! `DashMap`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::collaborators::Random;
use crate::ids::CommandId;
use crate::registry::HandlerIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// `min(initial * base^attempt, max_delay)`, the upper bound the actual
    /// sleep is sampled uniformly from (full jitter).
    pub fn computed_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn sample_delay(&self, attempt: u32, random: &dyn Random) -> Duration {
        let bound = self.computed_delay(attempt);
        let sampled = random.uniform(0.0, bound.as_secs_f64());
        Duration::from_secs_f64(sampled.max(0.0))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { consecutive_successes: u32 },
}

/// A single handler's breaker. `phase()` is cheap and lock-free-ish (a
/// short mutex acquisition) so the metrics collector can poll it for the
/// `circuit_breaker_state` gauge without disturbing the hot path.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn phase(&self) -> BreakerPhase {
        match &*self.state.lock().unwrap() {
            BreakerState::Closed { .. } => BreakerPhase::Closed,
            BreakerState::Open { .. } => BreakerPhase::Open,
            BreakerState::HalfOpen { .. } => BreakerPhase::HalfOpen,
        }
    }

    /// Whether a call may proceed right now. `Open` transitions itself to
    /// `HalfOpen` here once `recovery_timeout` has elapsed, admitting
    /// exactly the caller that observes the transition as the probe.
    pub fn admit(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match &*state {
            BreakerState::Closed { .. } => true,
            BreakerState::HalfOpen { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    *state = BreakerState::HalfOpen {
                        consecutive_successes: 0,
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            BreakerState::Closed { consecutive_failures } => {
                *consecutive_failures = 0;
            }
            BreakerState::HalfOpen { consecutive_successes } => {
                *consecutive_successes += 1;
                if *consecutive_successes >= self.config.success_threshold {
                    *state = BreakerState::Closed {
                        consecutive_failures: 0,
                    };
                }
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            BreakerState::Closed { consecutive_failures } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            BreakerState::HalfOpen { .. } => {
                *state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }
}

/// Lazily creates one breaker per handler identity.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<HandlerIdentity, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, identity: &HandlerIdentity) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }

    pub fn snapshot_states(&self) -> Vec<(HandlerIdentity, BreakerPhase)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().phase()))
            .collect()
    }
}

/// One permanently-failed command, retained for operator inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub command_id: CommandId,
    pub command_type: &'static str,
    pub error: String,
    pub attempts: u32,
    pub first_attempted: Instant,
    pub last_attempted: Instant,
}

/// Bounded ring buffer; oldest evicted when full, matching `drop_oldest`
/// semantics applied to the DLQ rather than the event queue.
pub struct DeadLetterQueue {
    capacity: usize,
    items: tokio::sync::Mutex<VecDeque<DeadLetter>>,
    size: AtomicU64,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: tokio::sync::Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            size: AtomicU64::new(0),
        }
    }

    pub async fn push(&self, item: DeadLetter) {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            items.pop_front();
        } else {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> Vec<DeadLetter> {
        self.items.lock().await.iter().cloned().collect()
    }
}
