//! Observability hook: the one egress channel the core requires from
//! collaborators. Concrete sinks (console/file/OTel) live outside the core.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;

use crate::message::EventEnvelope;
use crate::metrics::{names, MetricsCollector};

/// Invoked exactly once per published event, synchronously on the
/// publishing path before `publish()` returns. Async because real sinks
/// (OTel exporters, log shippers) are I/O-bound even though the core ships
/// no concrete implementation beyond [`NoopHook`].
#[async_trait]
pub trait ObservabilityHook: Send + Sync {
    async fn observe(&self, event: &EventEnvelope);
}

/// The default hook, so `Bus` never carries an `Option` to unwrap on the
/// hot path.
#[derive(Debug, Default)]
pub struct NoopHook;

#[async_trait]
impl ObservabilityHook for NoopHook {
    async fn observe(&self, _event: &EventEnvelope) {}
}

/// Runs `hook.observe(event)`, catching a panic from inside the hook and
/// counting it rather than propagating — hook failures must never abort
/// publishing.
pub(crate) async fn observe_guarded(
    hook: &dyn ObservabilityHook,
    event: &EventEnvelope,
    metrics: &MetricsCollector,
) {
    let result = AssertUnwindSafe(hook.observe(event)).catch_unwind().await;
    if result.is_err() {
        tracing::warn!(event_type = event.event_type, "observability hook panicked");
        metrics.incr_counter(names::OBSERVABILITY_HOOK_ERRORS_TOTAL, event.event_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EventId, SessionId};

    #[derive(Debug)]
    struct Ping;

    struct PanickingHook;

    #[async_trait]
    impl ObservabilityHook for PanickingHook {
        async fn observe(&self, _event: &EventEnvelope) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panicking_hook_is_caught_and_counted() {
        let metrics = MetricsCollector::new();
        let envelope = EventEnvelope::new(SessionId::bus(), EventId::new("e-1"), Ping);
        observe_guarded(&PanickingHook, &envelope, &metrics).await;
        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.counters[&format!("observability_hook_errors_total{{{}}}", envelope.event_type)],
            1
        );
    }

    #[tokio::test]
    async fn noop_hook_never_counts_errors() {
        let metrics = MetricsCollector::new();
        let envelope = EventEnvelope::new(SessionId::bus(), EventId::new("e-1"), Ping);
        observe_guarded(&NoopHook, &envelope, &metrics).await;
        assert!(metrics.snapshot().counters.is_empty());
    }
}
