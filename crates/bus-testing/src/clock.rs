//! A manually-advanceable `Clock`, for tests that assert on retry backoff,
//! circuit breaker recovery timeouts, or batch-timeout behavior without
//! sleeping real wall time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use bus_core::Clock;
use chrono::{DateTime, Utc};

pub struct FakeClock {
    monotonic: Mutex<Instant>,
    utc: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            monotonic: Mutex::new(Instant::now()),
            utc: Mutex::new(Utc::now()),
        }
    }

    /// Advances both the monotonic and wall clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        *self.monotonic.lock().unwrap() += duration;
        *self.utc.lock().unwrap() += chrono::Duration::from_std(duration).unwrap();
    }

    pub fn set_utc(&self, at: DateTime<Utc>) {
        *self.utc.lock().unwrap() = at;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_monotonic(&self) -> Instant {
        *self.monotonic.lock().unwrap()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_clocks_forward() {
        let clock = FakeClock::new();
        let before_mono = clock.now_monotonic();
        let before_utc = clock.now_utc();
        clock.advance(Duration::from_secs(5));
        assert!(clock.now_monotonic() >= before_mono + Duration::from_secs(5));
        assert_eq!(clock.now_utc(), before_utc + chrono::Duration::seconds(5));
    }
}
