//! Handler registry: scope-aware storage and lookup, keyed by
//! `(scope, message_type)`.
//!
//! Built on `dashmap::DashMap`'s shard-striped concurrent map: reads on
//! unrelated shards never block each other, and writes lock only the shard
//! touched. A `DashMap<Scope, DashMap<&'static str, _>>` gives the
//! two-level "scope, then type" lookup without a combined-key string
//! allocation per lookup.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{BusError, HandlerError};
use crate::handler::{CommandHandler, EventHandler};
use crate::ids::{HandlerKey, Scope, SessionId};
use crate::message::{Command, Event, EventEnvelope};
use crate::middleware::FilterFn;

/// Identifies a registered handler for circuit-breaker keying and logging.
/// Distinct from `HandlerKey`: two different registrations in the same
/// `(scope, type)` slot over time share an identity, which is what the
/// breaker wants — it tracks the *slot*, not a single registration's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerIdentity(pub String);

impl HandlerIdentity {
    fn for_command(scope: &Scope, message_type: &str) -> Self {
        Self(format!("cmd:{scope}:{message_type}"))
    }
}

impl std::fmt::Display for HandlerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub(crate) trait ErasedCommandHandler: Send + Sync {
    /// Takes the payload by reference and clones the concrete command
    /// before invoking the handler, so the caller can retry with the same
    /// envelope rather than having the payload consumed on the first
    /// attempt.
    async fn call(
        &self,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<Arc<dyn Any + Send + Sync>, HandlerError>;
}

struct CommandHandlerAdapter<C, H> {
    handler: Arc<H>,
    _marker: std::marker::PhantomData<fn(C)>,
}

#[async_trait]
impl<C, H> ErasedCommandHandler for CommandHandlerAdapter<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    async fn call(
        &self,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<Arc<dyn Any + Send + Sync>, HandlerError> {
        let command = payload
            .downcast_ref::<C>()
            .expect("command payload type must match the registry slot it was resolved from")
            .clone();
        let output = self.handler.handle(command).await?;
        Ok(Arc::new(output) as Arc<dyn Any + Send + Sync>)
    }
}

#[async_trait]
pub(crate) trait ErasedEventHandler: Send + Sync {
    async fn call(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

struct EventHandlerAdapter<E, H> {
    handler: Arc<H>,
    _marker: std::marker::PhantomData<fn(E)>,
}

#[async_trait]
impl<E, H> ErasedEventHandler for EventHandlerAdapter<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    async fn call(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        match envelope.downcast_ref::<E>() {
            Some(event) => self.handler.handle(event).await,
            None => Ok(()),
        }
    }
}

pub(crate) struct CommandSlot {
    pub key: HandlerKey,
    pub identity: HandlerIdentity,
    pub handler: Arc<dyn ErasedCommandHandler>,
}

#[derive(Clone)]
pub(crate) struct EventSlot {
    pub key: HandlerKey,
    pub priority: u32,
    pub filter: Option<FilterFn>,
    pub handler: Arc<dyn ErasedEventHandler>,
}

/// Result of resolving a command: the handler plus its stable identity,
/// used by the resilience layer to key retry/breaker state per slot.
pub(crate) struct ResolvedCommand {
    pub handler: Arc<dyn ErasedCommandHandler>,
    pub identity: HandlerIdentity,
}

#[derive(Default)]
pub struct HandlerRegistry {
    commands: DashMap<Scope, DashMap<&'static str, CommandSlot>>,
    events: DashMap<Scope, DashMap<&'static str, Vec<EventSlot>>>,
    registration_order: AtomicU64,
    registered_handlers: AtomicUsize,
}

fn validate_scope(scope: &Scope) -> Result<(), BusError> {
    if let Scope::Session(id) = scope {
        if id.as_str().trim().is_empty() {
            return Err(BusError::InvalidScope("session id must not be empty".into()));
        }
        if id.is_bus() {
            // "BUS" resolves to Scope::Bus via Scope::from_session_id; a
            // caller constructing Scope::Session(SessionId::bus()) directly
            // has bypassed that and is asking for the reserved name.
            return Err(BusError::InvalidScope(
                "\"BUS\" is reserved and cannot be used as a session scope".into(),
            ));
        }
    }
    Ok(())
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered_handlers(&self) -> usize {
        self.registered_handlers.load(Ordering::Relaxed)
    }

    fn next_order(&self) -> u64 {
        self.registration_order.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_command<C, H>(
        &self,
        message_type: &'static str,
        handler: H,
        scope: Scope,
    ) -> Result<HandlerKey, BusError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        validate_scope(&scope)?;
        let scope_map = self.commands.entry(scope.clone()).or_default();
        if scope_map.contains_key(message_type) {
            return Err(BusError::DuplicateHandler(message_type, scope));
        }
        let key = HandlerKey {
            scope: scope.clone(),
            message_type,
            registration_order: self.next_order(),
        };
        let identity = HandlerIdentity::for_command(&scope, message_type);
        let slot = CommandSlot {
            key: key.clone(),
            identity,
            handler: Arc::new(CommandHandlerAdapter {
                handler: Arc::new(handler),
                _marker: std::marker::PhantomData,
            }),
        };
        scope_map.insert(message_type, slot);
        self.registered_handlers.fetch_add(1, Ordering::Relaxed);
        Ok(key)
    }

    pub fn register_event<E, H>(
        &self,
        message_type: &'static str,
        handler: H,
        scope: Scope,
        priority: u32,
        filter: Option<FilterFn>,
    ) -> Result<HandlerKey, BusError>
    where
        E: Event,
        H: EventHandler<E>,
    {
        validate_scope(&scope)?;
        let key = HandlerKey {
            scope: scope.clone(),
            message_type,
            registration_order: self.next_order(),
        };
        let slot = EventSlot {
            key: key.clone(),
            priority,
            filter,
            handler: Arc::new(EventHandlerAdapter {
                handler: Arc::new(handler),
                _marker: std::marker::PhantomData,
            }),
        };
        self.events
            .entry(scope)
            .or_default()
            .entry(message_type)
            .or_default()
            .push(slot);
        self.registered_handlers.fetch_add(1, Ordering::Relaxed);
        Ok(key)
    }

    /// Idempotent: removing an already-absent key is a no-op.
    pub fn unregister(&self, key: &HandlerKey) {
        if let Some(scope_map) = self.commands.get(&key.scope) {
            if let Some(entry) = scope_map.get(key.message_type) {
                if entry.key.registration_order == key.registration_order {
                    drop(entry);
                    scope_map.remove(key.message_type);
                    self.registered_handlers.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        if let Some(scope_map) = self.events.get(&key.scope) {
            if let Some(mut slots) = scope_map.get_mut(key.message_type) {
                let before = slots.len();
                slots.retain(|s| s.key.registration_order != key.registration_order);
                if slots.len() != before {
                    self.registered_handlers.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Bulk removal for session teardown; returns the keys removed so the
    /// caller can log/assert on them.
    pub fn unregister_scope(&self, session_id: &SessionId) -> Vec<HandlerKey> {
        let scope = Scope::Session(session_id.clone());
        let mut removed = Vec::new();
        if let Some((_, scope_map)) = self.commands.remove(&scope) {
            for (_, slot) in scope_map {
                removed.push(slot.key);
            }
        }
        if let Some((_, scope_map)) = self.events.remove(&scope) {
            for (_, slots) in scope_map {
                removed.extend(slots.into_iter().map(|s| s.key));
            }
        }
        self.registered_handlers
            .fetch_sub(removed.len(), Ordering::Relaxed);
        removed
    }

    /// Session-scoped handler wins; falls back to bus-scoped; `NoHandler`
    /// otherwise.
    pub(crate) fn resolve_command(
        &self,
        message_type: &'static str,
        session_id: &SessionId,
    ) -> Result<ResolvedCommand, BusError> {
        let session_scope = Scope::from_session_id(session_id);
        if let Scope::Session(_) = &session_scope {
            if let Some(scope_map) = self.commands.get(&session_scope) {
                if let Some(slot) = scope_map.get(message_type) {
                    return Ok(ResolvedCommand {
                        handler: slot.handler.clone(),
                        identity: slot.identity.clone(),
                    });
                }
            }
        }
        if let Some(scope_map) = self.commands.get(&Scope::Bus) {
            if let Some(slot) = scope_map.get(message_type) {
                return Ok(ResolvedCommand {
                    handler: slot.handler.clone(),
                    identity: slot.identity.clone(),
                });
            }
        }
        Err(BusError::NoHandler(message_type, session_scope))
    }

    /// Union of matching session-scope handlers and all bus-scope handlers,
    /// sorted by `(priority desc, registration_order asc)`, filtered by each
    /// slot's own optional predicate.
    pub(crate) fn resolve_event(&self, envelope: &EventEnvelope) -> Vec<EventSlot> {
        let mut matches = Vec::new();
        let session_scope = Scope::from_session_id(&envelope.session_id);
        if let Scope::Session(_) = &session_scope {
            if let Some(scope_map) = self.events.get(&session_scope) {
                if let Some(slots) = scope_map.get(envelope.event_type) {
                    matches.extend(slots.iter().cloned());
                }
            }
        }
        if let Some(scope_map) = self.events.get(&Scope::Bus) {
            if let Some(slots) = scope_map.get(envelope.event_type) {
                matches.extend(slots.iter().cloned());
            }
        }
        matches.retain(|slot| match &slot.filter {
            Some(f) => f(envelope),
            None => true,
        });
        matches.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.key.registration_order.cmp(&b.key.registration_order))
        });
        matches
    }
}
