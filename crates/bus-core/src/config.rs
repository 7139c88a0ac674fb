//! Configuration: the named, defaulted options `BusBuilder` assembles
//! into the collaborator/queue/resilience configs each component actually
//! consumes.

use std::time::Duration;

use crate::queue::{OverflowPolicy, QueueConfig};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub event_queue_size: usize,
    pub high_water_mark_ratio: f64,
    pub low_water_mark_ratio: f64,
    pub overflow_policy: OverflowPolicy,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub dead_letter_queue_capacity: usize,
    pub default_session_id: &'static str,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 10_000,
            high_water_mark_ratio: 0.8,
            low_water_mark_ratio: 0.5,
            overflow_policy: OverflowPolicy::RejectNew,
            batch_size: 100,
            batch_timeout: Duration::from_millis(100),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            dead_letter_queue_capacity: 1000,
            default_session_id: "BUS",
        }
    }
}

impl BusConfig {
    pub(crate) fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.event_queue_size,
            high_water_mark_ratio: self.high_water_mark_ratio,
            low_water_mark_ratio: self.low_water_mark_ratio,
            overflow_policy: self.overflow_policy,
        }
    }
}
