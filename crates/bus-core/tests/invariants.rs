//! Nine universal invariants the bus must uphold, as property-based tests
//! (`proptest`) where the input space is worth sweeping, and as direct
//! assertions where the property is about a fixed state machine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bus_core::{
    async_trait, BusBuilder, BusConfig, CircuitBreakerConfig, Command, CommandHandler, ErrorKind, Event,
    EventHandler, HandlerError, OverflowPolicy, RetryConfig, Scope,
};
use bus_testing::{EventTap, FakeRandom, FixedIdGenerator};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Echo(String);
impl Command for Echo {}

struct EchoHandler;

#[async_trait]
impl CommandHandler<Echo> for EchoHandler {
    type Output = String;

    async fn handle(&self, command: Echo) -> Result<String, HandlerError> {
        Ok(command.0)
    }
}

proptest! {
    /// Invariant 1: the caller always gets back exactly one `CommandResult`
    /// whose `command_id` matches the id assigned to that command.
    #[test]
    fn invariant_1_command_result_echoes_its_own_id(id in "[a-zA-Z0-9_-]{1,24}") {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let bus = BusBuilder::new().with_id_generator(Arc::new(FixedIdGenerator::new(id.clone()))).build();
            bus.start().await;
            let handle = bus.handle();
            handle.register_command_handler(EchoHandler, Scope::Bus).unwrap();

            let result = handle.execute("BUS", Echo("hi".into()), None).await;
            prop_assert_eq!(result.command_id.as_str(), id.as_str());
            bus.stop(Duration::from_millis(200)).await;
            Ok(())
        })?;
    }

    /// Invariant 7: the retry delay sampled for attempt `i` always lands in
    /// `[0, min(initial * base^i, max_delay)]`.
    #[test]
    fn invariant_7_retry_delay_is_bounded(
        attempt in 0u32..6,
        fraction in 0.0f64..1.0,
        initial_ms in 1u64..500,
        base in 1.1f64..3.0,
    ) {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(5),
            exponential_base: base,
        };
        let random = FakeRandom::with_fraction(fraction);
        let bound = config.computed_delay(attempt);
        let sampled = config.sample_delay(attempt, &random);
        prop_assert!(sampled <= bound);
        prop_assert!(sampled >= Duration::ZERO);
    }

    /// Invariant 6: the bounded queue never holds more than `event_queue_size`
    /// items, regardless of how many publishes are attempted against it.
    #[test]
    fn invariant_6_queue_never_exceeds_capacity(capacity in 1usize..20, publishes in 0usize..40) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let mut config = BusConfig::default();
            config.event_queue_size = capacity;
            config.overflow_policy = OverflowPolicy::RejectNew;
            let bus = BusBuilder::new().with_config(config).build();
            let handle = bus.handle();

            for _ in 0..publishes {
                handle.publish("BUS", Tick).await;
                let snapshot = handle.get_metrics_snapshot();
                let size = snapshot.gauges.get("queue_size{}").copied().unwrap_or(0);
                prop_assert!(size as usize <= capacity);
            }
            Ok(())
        })?;
    }
}

#[derive(Debug, Clone)]
struct Tick;
impl Event for Tick {}

/// Invariant 4: registering then unregistering a handler leaves the
/// registry indistinguishable from never having registered it.
#[tokio::test]
async fn invariant_4_unregister_restores_prior_state() {
    let bus = BusBuilder::new().build();
    bus.start().await;
    let handle = bus.handle();

    let before = handle.get_metrics_snapshot();
    let before_count = before.gauges.get("registered_handlers{}").copied().unwrap_or(0);

    let key = handle.register_command_handler(EchoHandler, Scope::Bus).unwrap();
    let no_handler_before = handle.execute("BUS", DoWork, None).await;
    assert_eq!(no_handler_before.error_kind(), Some(ErrorKind::NoHandler));

    handle.unregister(&key);

    let after = handle.get_metrics_snapshot();
    let after_count = after.gauges.get("registered_handlers{}").copied().unwrap_or(0);
    assert_eq!(before_count, after_count);

    let result = handle.execute("BUS", Echo("x".into()), None).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::NoHandler));

    bus.stop(Duration::from_secs(1)).await;
}

#[derive(Debug, Clone)]
struct DoWork;
impl Command for DoWork {}

/// Invariant 5: closing a session unregisters all its handlers strictly
/// before `SessionEnd` is observed.
#[tokio::test]
async fn invariant_5_session_close_unregisters_before_session_end() {
    let tap = EventTap::new();
    let bus = BusBuilder::new().with_observability_hook(Arc::new(tap.clone())).build();
    bus.start().await;
    let handle = bus.handle();

    let invocations = Arc::new(AtomicU32::new(0));
    let session = handle.open_session(Some("s-5".into())).await;
    handle
        .register_event_handler(CountingHandler(invocations.clone()), Scope::session(session.session_id().clone()), 0, None)
        .unwrap();

    session.close().await;

    // Publish after close: if the handler were still registered this would
    // increment the counter, which must not happen.
    handle.publish("s-5", Tick).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    let end_type = std::any::type_name::<bus_core::SessionEnd>();
    assert!(tap.events().iter().any(|e| e.event_type == end_type));

    bus.stop(Duration::from_secs(1)).await;
}

struct CountingHandler(Arc<AtomicU32>);

#[async_trait]
impl EventHandler<Tick> for CountingHandler {
    async fn handle(&self, _event: &Tick) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Invariant 8: a breaker only moves `Closed -> Open`, `Open -> HalfOpen`
/// (after `recovery_timeout`), and `HalfOpen -> Closed | Open`. Exercised
/// black-box through `execute`, with a short `recovery_timeout` so the test
/// doesn't wait a real minute.
#[tokio::test]
async fn invariant_8_breaker_state_machine_obeys_transitions() {
    let mut config = BusConfig::default();
    config.retry = RetryConfig {
        max_retries: 0,
        ..RetryConfig::default()
    };
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_millis(50),
        success_threshold: 1,
    };
    let bus = BusBuilder::new().with_config(config).with_random(Arc::new(FakeRandom::default())).build();
    bus.start().await;
    let handle = bus.handle();

    let calls = Arc::new(AtomicU32::new(0));
    handle
        .register_command_handler(AlwaysFailsThenSucceeds(calls.clone()), Scope::Bus)
        .unwrap();

    // Two failures trip the breaker open (failure_threshold = 2).
    let _ = handle.execute("BUS", DoWork, None).await;
    let _ = handle.execute("BUS", DoWork, None).await;

    let open = handle.execute("BUS", DoWork, None).await;
    assert_eq!(open.error_kind(), Some(ErrorKind::CircuitOpen));
    assert_eq!(open.attempts, 0);

    // After recovery_timeout elapses, the breaker half-opens and admits a
    // probe; the handler now succeeds, closing the breaker again.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let recovered = handle.execute("BUS", DoWork, None).await;
    assert!(recovered.is_success());

    bus.stop(Duration::from_secs(1)).await;
}

struct AlwaysFailsThenSucceeds(Arc<AtomicU32>);

#[async_trait]
impl CommandHandler<DoWork> for AlwaysFailsThenSucceeds {
    type Output = ();

    async fn handle(&self, _command: DoWork) -> Result<(), HandlerError> {
        let n = self.0.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err("fail".into())
        } else {
            Ok(())
        }
    }
}

/// Invariant 9: the event-count conservation equation holds at any stable
/// observation point (here: once the dispatch loop has drained everything
/// in flight).
#[tokio::test]
async fn invariant_9_event_counts_are_conserved() {
    let bus = BusBuilder::new().build();
    bus.start().await;
    let handle = bus.handle();

    // A single handler, so "processed/failed per handler invocation" and
    // "published per event" are the same count — with more than one handler
    // registered, processed+failed is counted per (event, handler) pair and
    // can exceed published, which this equation does not account for.
    let ok_count = Arc::new(AtomicU32::new(0));
    handle
        .register_event_handler(CountingHandler(ok_count.clone()), Scope::Bus, 0, None)
        .unwrap();

    for _ in 0..10 {
        handle.publish("BUS", Tick).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = handle.get_metrics_snapshot();
    let tick_type = std::any::type_name::<Tick>();
    let published = snapshot.counters.get(&format!("events_published_total{{{tick_type}}}")).copied().unwrap_or(0);
    let processed = snapshot.counters.get(&format!("events_processed_total{{{tick_type}}}")).copied().unwrap_or(0);
    let failed = snapshot.counters.get(&format!("events_failed_total{{{tick_type}}}")).copied().unwrap_or(0);
    let dropped = snapshot.counters.get(&format!("events_dropped_total{{shutdown}}")).copied().unwrap_or(0);
    let rejected = snapshot.counters.get(&format!("events_rejected_total{{}}")).copied().unwrap_or(0);
    let queue_size = snapshot.gauges.get("queue_size{}").copied().unwrap_or(0) as u64;

    assert_eq!(published, processed + failed + dropped + rejected + queue_size);

    bus.stop(Duration::from_secs(1)).await;
}

/// Invariant 2: the observability hook sees an event before any handler
/// runs for it. By the time a handler is invoked (always on the dispatch
/// loop, strictly after `publish` returns), the tap must already contain
/// the event.
#[tokio::test]
async fn invariant_2_hook_precedes_handler_dispatch() {
    let tap = EventTap::new();
    let bus = BusBuilder::new().with_observability_hook(Arc::new(tap.clone())).build();
    bus.start().await;
    let handle = bus.handle();

    let saw_event_already_tapped = Arc::new(Mutex::new(false));
    handle
        .register_event_handler(
            ObservedBeforeHandling {
                tap: tap.clone(),
                flag: saw_event_already_tapped.clone(),
            },
            Scope::Bus,
            0,
            None,
        )
        .unwrap();

    handle.publish("BUS", Tick).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(*saw_event_already_tapped.lock().unwrap());

    bus.stop(Duration::from_secs(1)).await;
}

struct ObservedBeforeHandling {
    tap: EventTap,
    flag: Arc<Mutex<bool>>,
}

#[async_trait]
impl EventHandler<Tick> for ObservedBeforeHandling {
    async fn handle(&self, _event: &Tick) -> Result<(), HandlerError> {
        let tick_type = std::any::type_name::<Tick>();
        *self.flag.lock().unwrap() = self.tap.events().iter().any(|e| e.event_type == tick_type);
        Ok(())
    }
}

/// Invariant 3: for a single producer publishing at equal priority, a
/// single handler observes them in publish order.
#[tokio::test]
async fn invariant_3_single_handler_preserves_publish_order() {
    let bus = BusBuilder::new().build();
    bus.start().await;
    let handle = bus.handle();

    let order = Arc::new(Mutex::new(Vec::new()));
    handle
        .register_event_handler(OrderRecordingHandler(order.clone()), Scope::Bus, 0, None)
        .unwrap();

    for n in 0..20u32 {
        handle.publish("BUS", Numbered(n)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let recorded = order.lock().unwrap().clone();
    assert_eq!(recorded, (0..20).collect::<Vec<_>>());

    bus.stop(Duration::from_secs(1)).await;
}

#[derive(Debug, Clone)]
struct Numbered(u32);
impl Event for Numbered {}

struct OrderRecordingHandler(Arc<Mutex<Vec<u32>>>);

#[async_trait]
impl EventHandler<Numbered> for OrderRecordingHandler {
    async fn handle(&self, event: &Numbered) -> Result<(), HandlerError> {
        self.0.lock().unwrap().push(event.0);
        Ok(())
    }
}
