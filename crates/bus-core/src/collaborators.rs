//! The collaborator interfaces the bus consumes: `Clock`, `Random`,
//! `IdGenerator`. Default implementations are wired in by `BusBuilder`;
//! tests substitute the fakes from the `bus-testing` crate to get
//! deterministic timestamps, jitter, and ids.

use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Monotonic time for durations/histograms, wall time for timestamps.
pub trait Clock: Send + Sync {
    fn now_monotonic(&self) -> Instant;
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Uniform sampling on `[a, b]`, used by the resilience layer for full
/// jitter.
pub trait Random: Send + Sync {
    fn uniform(&self, a: f64, b: f64) -> f64;
}

/// Production `Random` backed by `fastrand`. Thread-local, so sampling
/// never contends a shared lock on the hot retry path.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastrandRandom;

impl Random for FastrandRandom {
    fn uniform(&self, a: f64, b: f64) -> f64 {
        if b <= a {
            return a;
        }
        a + fastrand::f64() * (b - a)
    }
}

/// Generates opaque ids for `CommandId`/`EventId`.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV4IdGenerator;

impl IdGenerator for UuidV4IdGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
