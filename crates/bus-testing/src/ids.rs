//! Deterministic `IdGenerator`s, so assertions can pin exact command/event
//! ids instead of matching against opaque UUIDs.

use std::sync::atomic::{AtomicU64, Ordering};

use bus_core::IdGenerator;

/// Always returns the same id. Useful when a test only has one command or
/// event in flight and doesn't care about uniqueness.
pub struct FixedIdGenerator {
    id: String,
}

impl FixedIdGenerator {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl IdGenerator for FixedIdGenerator {
    fn new_id(&self) -> String {
        self.id.clone()
    }
}

/// Returns `"{prefix}-0"`, `"{prefix}-1"`, ... in call order. Useful when a
/// test needs to distinguish several ids but still wants them predictable.
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_generator_repeats_the_same_id() {
        let gen = FixedIdGenerator::new("cmd-1");
        assert_eq!(gen.new_id(), "cmd-1");
        assert_eq!(gen.new_id(), "cmd-1");
    }

    #[test]
    fn sequential_generator_increments() {
        let gen = SequentialIdGenerator::new("evt");
        assert_eq!(gen.new_id(), "evt-0");
        assert_eq!(gen.new_id(), "evt-1");
        assert_eq!(gen.new_id(), "evt-2");
    }
}
