//! `BusBuilder` assembles a `Bus`; `Bus` owns the background dispatch loop's
//! lifecycle, `BusHandle` is the cheap, cloneable handle producers and
//! session owners actually call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::collaborators::{Clock, FastrandRandom, IdGenerator, Random, SystemClock, UuidV4IdGenerator};
use crate::config::BusConfig;
use crate::dispatch::{DispatchEngine, DispatchEngineConfig, EngineSessionSink, PublishOutcome};
use crate::error::BusError;
use crate::events;
use crate::handler::{CommandHandler, EventHandler};
use crate::ids::{EventId, HandlerKey, Scope, SessionId};
use crate::message::{Command, CommandResult, Event, EventEnvelope};
use crate::metrics::MetricsSnapshot;
use crate::middleware::{CommandMiddleware, FilterFn};
use crate::observability::{NoopHook, ObservabilityHook};
use crate::queue::BoundedEventQueue;
use crate::registry::HandlerRegistry;
use crate::resilience::{CircuitBreakerRegistry, DeadLetter};
use crate::session::{SessionEventSink, SessionHandle, SessionManager};

/// Assembles a [`Bus`] from a [`BusConfig`] and the collaborator traits:
/// `Clock`, `Random`, `IdGenerator`, `ObservabilityHook`. Defaults to the
/// production implementations; tests substitute the fakes in `bus-testing`
/// for determinism.
pub struct BusBuilder {
    config: BusConfig,
    clock: Arc<dyn Clock>,
    id_gen: Arc<dyn IdGenerator>,
    random: Arc<dyn Random>,
    hook: Arc<dyn ObservabilityHook>,
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self {
            config: BusConfig::default(),
            clock: Arc::new(SystemClock),
            id_gen: Arc::new(UuidV4IdGenerator),
            random: Arc::new(FastrandRandom),
            hook: Arc::new(NoopHook),
        }
    }
}

impl BusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn Random>) -> Self {
        self.random = random;
        self
    }

    pub fn with_observability_hook(mut self, hook: Arc<dyn ObservabilityHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn build(self) -> Bus {
        let registry = Arc::new(HandlerRegistry::new());
        let queue = Arc::new(BoundedEventQueue::new(self.config.queue_config()));
        let metrics = Arc::new(crate::metrics::MetricsCollector::new());
        let session_manager = Arc::new(SessionManager::new(registry.clone()));
        let breakers = CircuitBreakerRegistry::new(self.config.circuit_breaker);

        let dispatch = Arc::new(DispatchEngine::new(DispatchEngineConfig {
            registry,
            queue,
            metrics,
            hook: self.hook,
            clock: self.clock,
            id_gen: self.id_gen,
            random: self.random,
            retry_config: self.config.retry,
            breakers,
            dlq_capacity: self.config.dead_letter_queue_capacity,
            session_manager,
            batch_size: self.config.batch_size,
            batch_timeout: self.config.batch_timeout,
        }));

        Bus {
            dispatch,
            loop_handle: AsyncMutex::new(None),
        }
    }
}

/// Owns the background dispatch loop's lifecycle. Cloning work is done
/// through [`BusHandle`] (`bus.handle()`), not through `Bus` itself.
pub struct Bus {
    dispatch: Arc<DispatchEngine>,
    loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Bus {
    pub fn handle(&self) -> BusHandle {
        BusHandle {
            dispatch: Arc::clone(&self.dispatch),
        }
    }

    /// Spawns the background event dispatch loop. Idempotent: calling twice
    /// without an intervening `stop()` is a no-op.
    pub async fn start(&self) {
        let mut guard = self.loop_handle.lock().await;
        if guard.is_some() {
            return;
        }
        let dispatch = Arc::clone(&self.dispatch);
        *guard = Some(tokio::spawn(dispatch.run_dispatch_loop()));
    }

    /// Stops accepting new publishes, drains the bounded queue for up to
    /// `grace_period`, then abandons whatever remains (counted into
    /// `events_dropped_total`), and waits for the dispatch loop task to
    /// exit.
    pub async fn stop(&self, grace_period: Duration) {
        self.dispatch.begin_shutdown(grace_period);
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// The cheap, cloneable public API surface. `Bus` assembles the machinery;
/// `BusHandle` is what producers, handlers, and session owners actually
/// hold onto.
#[derive(Clone)]
pub struct BusHandle {
    dispatch: Arc<DispatchEngine>,
}

impl BusHandle {
    pub async fn publish<E: Event>(&self, session_id: impl Into<SessionId>, event: E) -> PublishOutcome {
        self.dispatch.publish(session_id.into(), event).await
    }

    pub async fn execute<C: Command>(
        &self,
        session_id: impl Into<SessionId>,
        command: C,
        timeout: Option<Duration>,
    ) -> CommandResult {
        self.dispatch.execute(session_id.into(), command, timeout).await
    }

    pub fn register_command_handler<C, H>(&self, handler: H, scope: Scope) -> Result<HandlerKey, BusError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.dispatch
            .registry()
            .register_command::<C, H>(std::any::type_name::<C>(), handler, scope)
    }

    pub fn register_event_handler<E, H>(
        &self,
        handler: H,
        scope: Scope,
        priority: u32,
        filter: Option<FilterFn>,
    ) -> Result<HandlerKey, BusError>
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.dispatch
            .registry()
            .register_event::<E, H>(std::any::type_name::<E>(), handler, scope, priority, filter)
    }

    pub fn unregister(&self, key: &HandlerKey) {
        self.dispatch.registry().unregister(key);
    }

    /// Opens a scoped session: registrations made through the returned
    /// handle are torn down automatically when it closes or drops.
    pub async fn open_session(&self, id: Option<SessionId>) -> SessionHandle {
        let session_id = id.unwrap_or_else(|| SessionId::new(self.dispatch.id_gen().new_id()));
        self.dispatch.session_manager().open(session_id.clone());

        let start_event = events::SessionStart {
            session_id: session_id.clone(),
            started_at: chrono::Utc::now(),
        };
        self.dispatch
            .publish_internal_event(EventEnvelope::new(
                session_id.clone(),
                EventId::new(self.dispatch.id_gen().new_id()),
                start_event,
            ))
            .await;

        let sink: Arc<dyn SessionEventSink> = Arc::new(EngineSessionSink(Arc::clone(&self.dispatch)));
        SessionHandle::new(
            session_id,
            Arc::clone(self.dispatch.session_manager()),
            sink,
            Arc::clone(self.dispatch.id_gen()),
        )
    }

    pub async fn add_command_middleware(&self, middleware: Arc<dyn CommandMiddleware>) {
        self.dispatch.add_command_middleware(middleware).await;
    }

    pub async fn add_event_filter(&self, filter: FilterFn) {
        self.dispatch.add_event_filter(filter).await;
    }

    pub async fn set_observability_hook(&self, hook: Arc<dyn ObservabilityHook>) {
        self.dispatch.set_observability_hook(hook).await;
    }

    pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        self.dispatch.metrics_snapshot()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dispatch.dead_letters().await
    }
}
