//! The six named end-to-end scenarios (S1-S6): literal inputs, literal
//! expected outputs, exercised purely through the public `BusHandle` API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus_core::{
    async_trait, BusBuilder, BusConfig, CircuitBreakerConfig, Command, CommandHandler, Event, EventHandler,
    EventHandlerFailed, HandlerError, OverflowPolicy, PublishOutcome, RejectReason, RetryConfig, Scope, SessionEnd,
};
use bus_testing::{EventTap, FakeRandom, FixedIdGenerator};

#[derive(Debug, Clone)]
struct Ping;
impl Command for Ping {}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pong;

struct PingHandler;

#[async_trait]
impl CommandHandler<Ping> for PingHandler {
    type Output = Pong;

    async fn handle(&self, _command: Ping) -> Result<Pong, HandlerError> {
        Ok(Pong)
    }
}

#[derive(Debug, Clone)]
struct Foo;
impl Command for Foo {}

#[tokio::test]
async fn s1_happy_path_command() {
    let tap = EventTap::new();
    let bus = BusBuilder::new()
        .with_id_generator(Arc::new(FixedIdGenerator::new("c1")))
        .with_observability_hook(Arc::new(tap.clone()))
        .build();
    bus.start().await;
    let handle = bus.handle();
    handle.register_command_handler(PingHandler, Scope::Bus).unwrap();

    let result = handle.execute("s1", Ping, None).await;

    assert!(result.is_success());
    assert_eq!(result.command_id.as_str(), "c1");
    assert_eq!(result.attempts, 1);
    assert_eq!(result.value_as::<Pong>(), Some(&Pong));

    let events = tap.events();
    let started_type = std::any::type_name::<bus_core::CommandStarted>();
    let started_idx = events.iter().position(|e| e.event_type == started_type).expect("CommandStarted observed");
    let result_type = std::any::type_name::<bus_core::CommandResult>();
    let result_idx = events.iter().position(|e| e.event_type == result_type).expect("CommandResult observed");
    assert!(started_idx < result_idx, "CommandStarted must precede the republished CommandResult");

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn s2_no_handler() {
    let tap = EventTap::new();
    let bus = BusBuilder::new().with_observability_hook(Arc::new(tap.clone())).build();
    bus.start().await;
    let handle = bus.handle();

    let result = handle.execute("BUS", Foo, None).await;

    assert!(!result.is_success());
    assert_eq!(result.error_kind(), Some(bus_core::ErrorKind::NoHandler));
    assert_eq!(result.attempts, 0);

    let started_type = std::any::type_name::<bus_core::CommandStarted>();
    assert!(tap.events().iter().all(|e| e.event_type != started_type));

    bus.stop(Duration::from_secs(1)).await;
}

#[derive(Debug, Clone)]
struct Tick;
impl Event for Tick {}

struct TickCounter(Arc<AtomicU32>);

#[async_trait]
impl EventHandler<Tick> for TickCounter {
    async fn handle(&self, _event: &Tick) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn s3_session_cleanup() {
    let tap = EventTap::new();
    let bus = BusBuilder::new().with_observability_hook(Arc::new(tap.clone())).build();
    bus.start().await;
    let handle = bus.handle();

    let session = handle.open_session(Some("job-1".into())).await;
    let count = Arc::new(AtomicU32::new(0));
    handle
        .register_event_handler(TickCounter(count.clone()), Scope::session(session.session_id().clone()), 0, None)
        .unwrap();

    let before = handle.get_metrics_snapshot();

    for _ in 0..3 {
        handle.publish(session.session_id().clone(), Tick).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(count.load(Ordering::SeqCst), 3);

    session.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.publish("job-1", Tick).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(count.load(Ordering::SeqCst), 3, "no handler invocations after close");

    let end_type = std::any::type_name::<SessionEnd>();
    assert!(tap.events().iter().any(|e| e.event_type == end_type && e.session_id.as_str() == "job-1"));

    let after = handle.get_metrics_snapshot();
    let active_before = before.gauges.get("active_sessions{}").copied().unwrap_or(0);
    let active_after = after.gauges.get("active_sessions{}").copied().unwrap_or(0);
    assert_eq!(active_after, active_before - 1, "active_sessions dropped by one after close");
    let handlers_before = before.gauges.get("registered_handlers{}").copied().unwrap_or(0);
    let handlers_after = after.gauges.get("registered_handlers{}").copied().unwrap_or(0);
    assert_eq!(handlers_before - handlers_after, 1, "registered_handlers dropped by one after close");

    bus.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn s4_backpressure_reject_new() {
    let mut config = BusConfig::default();
    config.event_queue_size = 3;
    config.overflow_policy = OverflowPolicy::RejectNew;
    let bus = BusBuilder::new().with_config(config).build();
    // Deliberately not started: nothing drains the queue, so all five
    // publishes land before any batch is pulled off it.
    let handle = bus.handle();

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(handle.publish("BUS", Tick).await);
    }

    assert_eq!(outcomes[0], PublishOutcome::Accepted);
    assert_eq!(outcomes[1], PublishOutcome::Accepted);
    assert_eq!(outcomes[2], PublishOutcome::Accepted);
    assert_eq!(outcomes[3], PublishOutcome::Rejected(RejectReason::QueueFull));
    assert_eq!(outcomes[4], PublishOutcome::Rejected(RejectReason::QueueFull));

    let snapshot = handle.get_metrics_snapshot();
    assert_eq!(snapshot.counters.get("events_rejected_total{}").copied().unwrap_or(0), 2);
}

#[derive(Debug, Clone)]
struct DoWork;
impl Command for DoWork {}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Done;

struct FlakyHandler {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl CommandHandler<DoWork> for FlakyHandler {
    type Output = Done;

    async fn handle(&self, _command: DoWork) -> Result<Done, HandlerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < 7 {
            Err(format!("transient failure #{n}").into())
        } else {
            Ok(Done)
        }
    }
}

#[tokio::test]
async fn s5_retry_then_circuit_breaker() {
    let mut config = BusConfig::default();
    config.retry = RetryConfig {
        max_retries: 3,
        ..RetryConfig::default()
    };
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(60),
        ..CircuitBreakerConfig::default()
    };
    let bus = BusBuilder::new()
        .with_config(config)
        .with_random(Arc::new(FakeRandom::default()))
        .build();
    bus.start().await;
    let handle = bus.handle();

    let calls = Arc::new(AtomicU32::new(0));
    handle
        .register_command_handler(FlakyHandler { calls: calls.clone() }, Scope::Bus)
        .unwrap();

    let first = handle.execute("BUS", DoWork, None).await;
    assert!(!first.is_success());
    assert_eq!(first.attempts, 4);
    assert_eq!(first.error_kind(), Some(bus_core::ErrorKind::HandlerFailure));

    // `first` left consecutive_failures at 4 (< threshold 5), so the breaker
    // is still Closed going into this call. It makes one real attempt, that
    // attempt fails and trips the breaker (consecutive_failures=5), and the
    // retry loop's next turn finds the breaker Open and bails out — so this
    // transition call reports CircuitOpen with attempts=1, not 0.
    let transition = handle.execute("BUS", DoWork, None).await;
    assert_eq!(transition.error_kind(), Some(bus_core::ErrorKind::CircuitOpen));
    assert_eq!(transition.attempts, 1, "breaker trips mid-call; the tripping attempt still counts");

    // Now the breaker is Open before this call even starts, so it's rejected
    // at the first admit() check with no attempts made.
    let after_open = handle.execute("BUS", DoWork, None).await;
    assert_eq!(after_open.error_kind(), Some(bus_core::ErrorKind::CircuitOpen));
    assert_eq!(after_open.attempts, 0, "breaker already open; rejected before any attempt");

    let dead_letters = handle.dead_letters().await;
    assert!(dead_letters.iter().any(|d| d.attempts == 4), "first exhausted command lands in the DLQ");

    bus.stop(Duration::from_secs(1)).await;
}

#[derive(Debug, Clone)]
struct Announce;
impl Event for Announce {}

struct RaisingHandler(Arc<AtomicU32>);

#[async_trait]
impl EventHandler<Announce> for RaisingHandler {
    async fn handle(&self, _event: &Announce) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err("boom".into())
    }
}

struct SucceedingHandler(Arc<AtomicU32>);

#[async_trait]
impl EventHandler<Announce> for SucceedingHandler {
    async fn handle(&self, _event: &Announce) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn s6_priority_and_failure_isolation() {
    let tap = EventTap::new();
    let bus = BusBuilder::new().with_observability_hook(Arc::new(tap.clone())).build();
    bus.start().await;
    let handle = bus.handle();

    let high_invocations = Arc::new(AtomicU32::new(0));
    let mid_invocations = Arc::new(AtomicU32::new(0));
    let low_invocations = Arc::new(AtomicU32::new(0));

    let high_key = handle
        .register_event_handler(RaisingHandler(high_invocations.clone()), Scope::Bus, 100, None)
        .unwrap();
    handle
        .register_event_handler(SucceedingHandler(mid_invocations.clone()), Scope::Bus, 50, None)
        .unwrap();
    handle
        .register_event_handler(SucceedingHandler(low_invocations.clone()), Scope::Bus, 10, None)
        .unwrap();

    let before = handle.get_metrics_snapshot();
    handle.publish("BUS", Announce).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(high_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(mid_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(low_invocations.load(Ordering::SeqCst), 1);

    let failed_type = std::any::type_name::<EventHandlerFailed>();
    let failures: Vec<_> = tap
        .events()
        .into_iter()
        .filter(|e| e.event_type == failed_type)
        .collect();
    assert_eq!(failures.len(), 1);
    let failed = failures[0].downcast_ref::<EventHandlerFailed>().unwrap();
    assert_eq!(failed.handler_identity, high_key.to_string());

    let after = handle.get_metrics_snapshot();
    let announce_type = std::any::type_name::<Announce>();
    let processed_before = before.counters.get(&format!("events_processed_total{{{announce_type}}}")).copied().unwrap_or(0);
    let processed_after = after.counters.get(&format!("events_processed_total{{{announce_type}}}")).copied().unwrap_or(0);
    assert_eq!(processed_after - processed_before, 2);
    let failed_before = before.counters.get(&format!("events_failed_total{{{announce_type}}}")).copied().unwrap_or(0);
    let failed_after = after.counters.get(&format!("events_failed_total{{{announce_type}}}")).copied().unwrap_or(0);
    assert_eq!(failed_after - failed_before, 1);

    bus.stop(Duration::from_secs(1)).await;
}
