//! The dispatch engine: the command path (middleware chain → registry
//! resolution → resilience-wrapped handler call → result) and the event
//! path (filters → bounded queue → batched priority fan-out).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant as TokioInstant;

use crate::collaborators::{Clock, IdGenerator, Random};
use crate::error::{Categorizable, ErrorKind};
use crate::events;
use crate::ids::{CommandId, EventId, SessionId};
use crate::message::{Command, CommandEnvelope, CommandResult, Event, EventEnvelope};
use crate::metrics::{names, MetricsCollector};
use crate::middleware::{BoxFuture, CommandMiddleware, FilterFn, NextMiddleware};
use crate::observability::{observe_guarded, ObservabilityHook};
use crate::queue::{BoundedEventQueue, PutOutcome, RejectReason};
use crate::registry::{HandlerRegistry, ResolvedCommand};
use crate::resilience::{CircuitBreakerRegistry, DeadLetter, DeadLetterQueue, RetryConfig};
use crate::session::{SessionEventSink, SessionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Filtered,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Dropped(DropReason),
    Rejected(RejectReason),
}

pub(crate) struct DispatchEngine {
    registry: Arc<HandlerRegistry>,
    queue: Arc<BoundedEventQueue>,
    metrics: Arc<MetricsCollector>,
    hook: tokio::sync::RwLock<Arc<dyn ObservabilityHook>>,
    clock: Arc<dyn Clock>,
    id_gen: Arc<dyn IdGenerator>,
    random: Arc<dyn Random>,
    retry_config: RetryConfig,
    breakers: CircuitBreakerRegistry,
    dlq: DeadLetterQueue,
    command_middleware: tokio::sync::RwLock<Vec<Arc<dyn CommandMiddleware>>>,
    event_filters: tokio::sync::RwLock<Vec<FilterFn>>,
    session_manager: Arc<SessionManager>,
    batch_size: usize,
    batch_timeout: Duration,
    shutting_down: AtomicBool,
    shutdown_deadline: Mutex<Option<TokioInstant>>,
}

pub(crate) struct DispatchEngineConfig {
    pub registry: Arc<HandlerRegistry>,
    pub queue: Arc<BoundedEventQueue>,
    pub metrics: Arc<MetricsCollector>,
    pub hook: Arc<dyn ObservabilityHook>,
    pub clock: Arc<dyn Clock>,
    pub id_gen: Arc<dyn IdGenerator>,
    pub random: Arc<dyn Random>,
    pub retry_config: RetryConfig,
    pub breakers: CircuitBreakerRegistry,
    pub dlq_capacity: usize,
    pub session_manager: Arc<SessionManager>,
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

impl DispatchEngine {
    pub(crate) fn new(config: DispatchEngineConfig) -> Self {
        Self {
            registry: config.registry,
            queue: config.queue,
            metrics: config.metrics,
            hook: tokio::sync::RwLock::new(config.hook),
            clock: config.clock,
            id_gen: config.id_gen,
            random: config.random,
            retry_config: config.retry_config,
            breakers: config.breakers,
            dlq: DeadLetterQueue::new(config.dlq_capacity),
            command_middleware: tokio::sync::RwLock::new(Vec::new()),
            event_filters: tokio::sync::RwLock::new(Vec::new()),
            session_manager: config.session_manager,
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout,
            shutting_down: AtomicBool::new(false),
            shutdown_deadline: Mutex::new(None),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub(crate) fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    pub(crate) fn id_gen(&self) -> &Arc<dyn IdGenerator> {
        &self.id_gen
    }

    pub(crate) async fn set_observability_hook(&self, hook: Arc<dyn ObservabilityHook>) {
        *self.hook.write().await = hook;
    }

    pub(crate) async fn add_command_middleware(&self, middleware: Arc<dyn CommandMiddleware>) {
        self.command_middleware.write().await.push(middleware);
    }

    pub(crate) async fn add_event_filter(&self, filter: FilterFn) {
        self.event_filters.write().await.push(filter);
    }

    // ---- event publish path (public API) ----

    pub(crate) async fn publish<E: Event>(&self, session_id: SessionId, event: E) -> PublishOutcome {
        if self.shutting_down.load(Ordering::Acquire) {
            return PublishOutcome::Dropped(DropReason::ShuttingDown);
        }
        let envelope = EventEnvelope::new(session_id, EventId::new(self.id_gen.new_id()), event);
        self.metrics.incr_counter(names::EVENTS_PUBLISHED_TOTAL, envelope.event_type);

        let filters = self.event_filters.read().await;
        let passes = filters.iter().all(|f| f(&envelope));
        drop(filters);
        if !passes {
            return PublishOutcome::Dropped(DropReason::Filtered);
        }

        observe_guarded(self.hook.read().await.as_ref().as_ref(), &envelope, &self.metrics).await;

        let outcome = match self.queue.put(envelope).await {
            PutOutcome::Accepted => PublishOutcome::Accepted,
            PutOutcome::Rejected(reason) => {
                self.metrics.incr_counter(names::EVENTS_REJECTED_TOTAL, "");
                PublishOutcome::Rejected(reason)
            }
        };
        self.metrics.set_gauge(names::QUEUE_SIZE, "", self.queue.len() as i64);
        self.metrics
            .set_gauge(names::BACKPRESSURE_ACTIVE, "", self.queue.backpressure_active() as i64);
        outcome
    }

    /// Publishes a bus-internal control event (`CommandStarted`,
    /// `CommandResult`, `SessionStart`, `SessionEnd`, `EventHandlerFailed`):
    /// observed through the same hook and filter-free dispatch path as
    /// `publish`, but bypasses the bounded queue's overflow policy so a
    /// backpressured queue can never swallow a `CommandResult` the caller is
    /// waiting on.
    pub(crate) async fn publish_internal_event(&self, envelope: EventEnvelope) {
        self.metrics.incr_counter(names::EVENTS_PUBLISHED_TOTAL, envelope.event_type);
        observe_guarded(self.hook.read().await.as_ref().as_ref(), &envelope, &self.metrics).await;
        self.process_event(envelope).await;
    }

    /// Dispatches one event to its resolved handlers and, if any failed,
    /// reports each failure via a (non-recursively-reported) `EventHandlerFailed`.
    async fn process_event(&self, envelope: EventEnvelope) {
        let failures = self.dispatch_to_handlers(&envelope).await;
        for (handler_identity, error) in failures {
            let failed = events::EventHandlerFailed {
                event_type: envelope.event_type,
                session_id: envelope.session_id.clone(),
                handler_identity,
                error,
            };
            let failed_envelope =
                EventEnvelope::new(envelope.session_id.clone(), EventId::new(self.id_gen.new_id()), failed);
            self.metrics
                .incr_counter(names::EVENTS_PUBLISHED_TOTAL, failed_envelope.event_type);
            observe_guarded(self.hook.read().await.as_ref().as_ref(), &failed_envelope, &self.metrics).await;
            // Reported once; a failure handling its own failure event is not
            // re-reported, bounding this at one extra level.
            let _ = self.dispatch_to_handlers(&failed_envelope).await;
        }
    }

    /// Resolves matching handlers, groups by descending priority, and runs
    /// each group concurrently; a handler panic is caught via `tokio::spawn`
    /// so it cannot poison the batch. Returns `(handler_identity, error)`
    /// for every failure observed.
    async fn dispatch_to_handlers(&self, envelope: &EventEnvelope) -> Vec<(String, String)> {
        let slots = self.registry.resolve_event(envelope);
        let mut groups: Vec<Vec<crate::registry::EventSlot>> = Vec::new();
        for slot in slots {
            match groups.last_mut() {
                Some(group) if group[0].priority == slot.priority => group.push(slot),
                _ => groups.push(vec![slot]),
            }
        }

        let mut failures = Vec::new();
        for group in groups {
            let tasks = group.into_iter().map(|slot| {
                let envelope = envelope.clone();
                let metrics = self.metrics.clone();
                let clock = self.clock.clone();
                let identity = slot.key.to_string();
                async move {
                    let started = clock.now_monotonic();
                    let handler = slot.handler.clone();
                    let join_result = tokio::spawn(async move { handler.call(&envelope).await }).await;
                    let elapsed = started.elapsed().as_secs_f64();
                    metrics.observe_duration(names::EVENT_PROCESSING_DURATION_SECONDS, envelope.event_type, elapsed);
                    match join_result {
                        Ok(Ok(())) => {
                            metrics.incr_counter(names::EVENTS_PROCESSED_TOTAL, envelope.event_type);
                            None
                        }
                        Ok(Err(err)) => {
                            metrics.incr_counter(names::EVENTS_FAILED_TOTAL, envelope.event_type);
                            Some((identity, err.to_string()))
                        }
                        Err(join_err) => {
                            metrics.incr_counter(names::EVENTS_FAILED_TOTAL, envelope.event_type);
                            Some((identity, format!("handler panicked: {join_err}")))
                        }
                    }
                }
            });
            failures.extend(join_all(tasks).await.into_iter().flatten());
        }
        failures
    }

    // ---- command execute path (public API) ----

    pub(crate) async fn execute<C: Command>(
        self: &Arc<Self>,
        session_id: SessionId,
        command: C,
        timeout: Option<Duration>,
    ) -> CommandResult {
        if self.shutting_down.load(Ordering::Acquire) {
            return CommandResult::failure(
                CommandId::new(self.id_gen.new_id()),
                ErrorKind::ShuttingDown,
                "bus is shutting down",
                0,
            );
        }
        let command_id = CommandId::new(self.id_gen.new_id());
        let command_type = command.message_type();
        self.metrics.incr_counter(names::COMMANDS_SENT_TOTAL, command_type);
        let envelope = CommandEnvelope::new(session_id.clone(), command_id.clone(), command);

        let middlewares = self.command_middleware.read().await.clone();
        let chain = build_chain(Arc::clone(self), middlewares);
        let exec_fut = chain(envelope);

        let (inflight_id, cancel_rx) = self.session_manager.register_inflight(&session_id);
        let result = match timeout {
            Some(duration) => {
                tokio::select! {
                    res = tokio::time::timeout(duration, exec_fut) => res.unwrap_or_else(|_| {
                        CommandResult::failure(command_id.clone(), ErrorKind::Timeout, "command timed out", 0)
                    }),
                    _ = cancel_rx => CommandResult::failure(command_id.clone(), ErrorKind::Cancelled, "session closed", 0),
                }
            }
            None => {
                tokio::select! {
                    res = exec_fut => res,
                    _ = cancel_rx => CommandResult::failure(command_id.clone(), ErrorKind::Cancelled, "session closed", 0),
                }
            }
        };
        self.session_manager.complete_inflight(inflight_id);
        result
    }

    /// The terminal link of the middleware chain: resolve, publish
    /// `CommandStarted`, run the resilience-wrapped handler, publish the
    /// resulting `CommandResult`, and return it.
    async fn dispatch_command_terminal(self: Arc<Self>, envelope: CommandEnvelope) -> CommandResult {
        let command_id = envelope.command_id.clone();
        let session_id = envelope.session_id.clone();
        let command_type = envelope.command_type;

        let resolved = match self.registry.resolve_command(command_type, &session_id) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.metrics.incr_counter(names::COMMANDS_FAILED_TOTAL, command_type);
                let result = CommandResult::failure(command_id, err.error_kind(), err.to_string(), 0);
                self.publish_internal_event(EventEnvelope::new(
                    session_id,
                    EventId::new(self.id_gen.new_id()),
                    result.clone(),
                ))
                .await;
                return result;
            }
        };

        let started = events::CommandStarted {
            command_id: command_id.clone(),
            command_type,
            session_id: session_id.clone(),
        };
        self.publish_internal_event(EventEnvelope::new(
            session_id.clone(),
            EventId::new(self.id_gen.new_id()),
            started,
        ))
        .await;

        let start_instant = self.clock.now_monotonic();
        let (outcome, attempts) = self.run_resilient(&resolved, &envelope).await;
        let elapsed = start_instant.elapsed().as_secs_f64();
        self.metrics
            .observe_duration(names::COMMAND_PROCESSING_DURATION_SECONDS, command_type, elapsed);

        let result = match outcome {
            Ok(value) => {
                self.metrics.incr_counter(names::COMMANDS_PROCESSED_TOTAL, command_type);
                CommandResult::success(command_id.clone(), value, attempts)
            }
            Err((kind, message)) => {
                self.metrics.incr_counter(names::COMMANDS_FAILED_TOTAL, command_type);
                if kind == ErrorKind::HandlerFailure {
                    self.dlq
                        .push(DeadLetter {
                            command_id: command_id.clone(),
                            command_type,
                            error: message.clone(),
                            attempts,
                            first_attempted: start_instant,
                            last_attempted: self.clock.now_monotonic(),
                        })
                        .await;
                }
                CommandResult::failure(command_id.clone(), kind, message, attempts)
            }
        };

        self.publish_internal_event(EventEnvelope::new(
            session_id,
            EventId::new(self.id_gen.new_id()),
            result.clone(),
        ))
        .await;

        result
    }

    /// Retry-with-full-jitter around a per-handler circuit breaker. Returns
    /// the terminal outcome and the number of attempts made.
    async fn run_resilient(
        &self,
        resolved: &ResolvedCommand,
        envelope: &CommandEnvelope,
    ) -> (Result<Arc<dyn std::any::Any + Send + Sync>, (ErrorKind, String)>, u32) {
        let breaker = self.breakers.get(&resolved.identity);
        let mut attempts_made: u32 = 0;
        loop {
            if !breaker.admit() {
                return (
                    Err((ErrorKind::CircuitOpen, format!("circuit open for {}", resolved.identity))),
                    attempts_made,
                );
            }
            let outcome = resolved.handler.call(envelope.payload.as_ref()).await;
            attempts_made += 1;
            match outcome {
                Ok(value) => {
                    breaker.record_success();
                    return (Ok(value), attempts_made);
                }
                Err(err) => {
                    breaker.record_failure();
                    if attempts_made > self.retry_config.max_retries {
                        return (Err((ErrorKind::HandlerFailure, err.to_string())), attempts_made);
                    }
                    let delay = self.retry_config.sample_delay(attempts_made - 1, self.random.as_ref());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // ---- dispatch loop & shutdown ----

    pub(crate) fn begin_shutdown(&self, grace_period: Duration) {
        *self.shutdown_deadline.lock().unwrap() = Some(TokioInstant::now() + grace_period);
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Runs until shut down, draining batches of pending events off the
    /// bounded queue. Intended to be spawned once per `Bus::start()`.
    pub(crate) async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            let deadline = *self.shutdown_deadline.lock().unwrap();
            if let Some(deadline) = deadline {
                if TokioInstant::now() >= deadline {
                    self.drain_and_count_abandoned().await;
                    return;
                }
            }
            let wait = deadline
                .map(|d| d.saturating_duration_since(TokioInstant::now()).min(self.batch_timeout))
                .unwrap_or(self.batch_timeout);
            let batch = self.queue.get_batch(self.batch_size, wait).await;
            if batch.is_empty() && self.shutting_down.load(Ordering::Acquire) && self.queue.len() == 0 {
                return;
            }
            for item in batch {
                self.process_event(item.event).await;
            }
            self.metrics.set_gauge(names::QUEUE_SIZE, "", self.queue.len() as i64);
            self.metrics
                .set_gauge(names::BACKPRESSURE_ACTIVE, "", self.queue.backpressure_active() as i64);
        }
    }

    async fn drain_and_count_abandoned(&self) {
        let abandoned = self.queue.drain_all().await;
        if !abandoned.is_empty() {
            self.metrics
                .incr_counter_by(names::EVENTS_DROPPED_TOTAL, "shutdown", abandoned.len() as u64);
            self.queue.record_shutdown_drop(abandoned.len() as u64);
        }
    }

    pub(crate) fn metrics_snapshot(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics
            .set_gauge(names::REGISTERED_HANDLERS, "", self.registry.registered_handlers() as i64);
        self.metrics
            .set_gauge(names::ACTIVE_SESSIONS, "", self.session_manager.active_count() as i64);
        self.metrics.set_gauge(names::DEAD_LETTER_QUEUE_SIZE, "", self.dlq.size() as i64);
        self.metrics.set_gauge(names::QUEUE_SIZE, "", self.queue.len() as i64);
        self.metrics
            .set_gauge(names::BACKPRESSURE_ACTIVE, "", self.queue.backpressure_active() as i64);
        for (identity, phase) in self.breakers.snapshot_states() {
            self.metrics
                .set_gauge(names::CIRCUIT_BREAKER_STATE, &identity.to_string(), phase as i64);
        }
        self.metrics.snapshot()
    }

    pub(crate) async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dlq.snapshot().await
    }
}

/// Bridges `DispatchEngine` to [`SessionEventSink`] so `SessionHandle` can
/// publish `SessionEnd` without depending on the `dispatch` module's
/// internals directly.
pub(crate) struct EngineSessionSink(pub(crate) Arc<DispatchEngine>);

impl SessionEventSink for EngineSessionSink {
    fn publish_internal(&self, event: EventEnvelope) -> BoxFuture<'static, ()> {
        let engine = Arc::clone(&self.0);
        Box::pin(async move {
            engine.publish_internal_event(event).await;
        })
    }
}

/// Builds the command middleware chain as a single `NextMiddleware`
/// continuation, terminating in `dispatch_command_terminal`. `FnOnce`
/// closures are sufficient since each chain is invoked exactly once per
/// `execute` call.
fn build_chain(engine: Arc<DispatchEngine>, mut middlewares: Vec<Arc<dyn CommandMiddleware>>) -> NextMiddleware {
    if middlewares.is_empty() {
        return Box::new(move |envelope: CommandEnvelope| {
            Box::pin(async move { engine.dispatch_command_terminal(envelope).await }) as BoxFuture<'static, CommandResult>
        });
    }
    let first = middlewares.remove(0);
    Box::new(move |envelope: CommandEnvelope| {
        let next = build_chain(engine, middlewares);
        Box::pin(async move { first.handle(envelope, next).await }) as BoxFuture<'static, CommandResult>
    })
}
