//! Testing utilities for `bus-core`: fakes for its collaborator traits
//! plus an event-recording observability hook, so tests get deterministic
//! time, ids, and jitter instead of wiring up the real `SystemClock`,
//! `UuidV4IdGenerator`, and `FastrandRandom`.

mod clock;
mod ids;
mod random;
mod tap;

pub use clock::FakeClock;
pub use ids::{FixedIdGenerator, SequentialIdGenerator};
pub use random::FakeRandom;
pub use tap::{EventTap, TappedEvent};
