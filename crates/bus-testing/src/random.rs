//! A deterministic `Random`, so retry-backoff and adaptive-rate-limit tests
//! don't flake on real jitter.

use std::sync::Mutex;

use bus_core::Random;

/// Returns `a + fraction * (b - a)` for a fixed `fraction`, or consumes a
/// scripted sequence of fractions if one was given, falling back to the
/// fixed fraction once the sequence is exhausted.
pub struct FakeRandom {
    fraction: f64,
    scripted: Mutex<Vec<f64>>,
}

impl FakeRandom {
    /// Always samples at this fraction of `[a, b]`. `0.0` picks the low
    /// bound, deterministically disabling jitter for retry-delay
    /// assertions.
    pub fn with_fraction(fraction: f64) -> Self {
        Self {
            fraction,
            scripted: Mutex::new(Vec::new()),
        }
    }

    /// Consumes `fractions` in order, one per call, then falls back to
    /// `0.0` once exhausted.
    pub fn scripted(fractions: impl IntoIterator<Item = f64>) -> Self {
        let mut scripted: Vec<f64> = fractions.into_iter().collect();
        scripted.reverse();
        Self {
            fraction: 0.0,
            scripted: Mutex::new(scripted),
        }
    }
}

impl Default for FakeRandom {
    /// No jitter: always the low bound.
    fn default() -> Self {
        Self::with_fraction(0.0)
    }
}

impl Random for FakeRandom {
    fn uniform(&self, a: f64, b: f64) -> f64 {
        if b <= a {
            return a;
        }
        let fraction = self.scripted.lock().unwrap().pop().unwrap_or(self.fraction);
        a + fraction * (b - a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_fraction_is_deterministic() {
        let random = FakeRandom::with_fraction(0.5);
        assert_eq!(random.uniform(0.0, 10.0), 5.0);
        assert_eq!(random.uniform(0.0, 10.0), 5.0);
    }

    #[test]
    fn scripted_sequence_is_consumed_in_order_then_falls_back() {
        let random = FakeRandom::scripted([0.0, 1.0]);
        assert_eq!(random.uniform(0.0, 10.0), 0.0);
        assert_eq!(random.uniform(0.0, 10.0), 10.0);
        assert_eq!(random.uniform(0.0, 10.0), 0.0);
    }

    #[test]
    fn degenerate_range_returns_lower_bound() {
        let random = FakeRandom::with_fraction(0.5);
        assert_eq!(random.uniform(3.0, 3.0), 3.0);
    }
}
