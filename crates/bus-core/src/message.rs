//! The message model: `Command`, `Event`, envelopes, and `CommandResult`.
//!
//! Commands and events are traits, not concrete structs — producers define
//! their own payload types and implement these marker traits. `Event` is
//! blanket-implemented for any `Debug + Send + Sync + 'static` type so
//! publishing an event never requires more than a `#[derive(Debug)]`;
//! `Command` requires an explicit (possibly empty) `impl Command for
//! MyCommand {}` so command authors opt in deliberately, since commands
//! carry transactional intent rather than mere facts.
//!
//! Once accepted by the bus, a payload is erased to `dyn Any` and carried
//! inside an envelope alongside its routing metadata. Handlers downcast back
//! to their concrete type at the point of invocation; filters and middleware
//! that don't need the payload itself work against the envelope metadata
//! alone.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::ids::{CommandId, EventId, SessionId};

/// Common supertrait of `Command` and `Event`: type-erasable, thread-safe,
/// debuggable.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Stable name used as the registry/routing key: the Rust type name.
    /// Since `Message` is blanket-implemented, every command/event type gets
    /// this for free and there is no per-type override — routing is by
    /// concrete Rust type, not a separate domain-name string.
    fn message_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T> Message for T where T: fmt::Debug + Send + Sync + 'static {}

/// Intent: a request for exactly one handler to do work and produce a
/// `CommandResult`. Requires an explicit (possibly empty) impl. `Clone` is
/// required because the resilience layer re-invokes the handler with the
/// same command on retry, and the payload is erased to `Box<dyn Any>` rather
/// than kept as a typed value the retry loop could hold onto.
pub trait Command: Message + Clone {}

/// Fact: broadcast to zero or more handlers, never mutated once published.
/// Blanket-implemented for any `Message`.
pub trait Event: Message {}

impl<T: Message> Event for T {}

/// A command in flight, carrying its routing metadata alongside the
/// type-erased payload. `payload` is `Box<dyn Any>` rather than `Box<dyn
/// Command>` so the concrete type can be recovered by value
/// (`Box<dyn Any>::downcast`) at the point a handler runs, without an
/// unstable trait-object upcast.
pub struct CommandEnvelope {
    pub command_id: CommandId,
    pub session_id: SessionId,
    pub command_type: &'static str,
    pub created_at: DateTime<Utc>,
    pub payload: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEnvelope")
            .field("command_id", &self.command_id)
            .field("session_id", &self.session_id)
            .field("command_type", &self.command_type)
            .finish()
    }
}

impl CommandEnvelope {
    pub fn new<C: Command>(session_id: SessionId, command_id: CommandId, payload: C) -> Self {
        let command_type = payload.message_type();
        Self {
            command_id,
            session_id,
            command_type,
            created_at: Utc::now(),
            payload: Box::new(payload),
        }
    }

    pub fn downcast_ref<C: Command>(&self) -> Option<&C> {
        self.payload.downcast_ref::<C>()
    }

    pub fn downcast<C: Command>(self) -> Result<C, Self> {
        let CommandEnvelope {
            command_id,
            session_id,
            command_type,
            created_at,
            payload,
        } = self;
        match payload.downcast::<C>() {
            Ok(concrete) => Ok(*concrete),
            Err(payload) => Err(Self {
                command_id,
                session_id,
                command_type,
                created_at,
                payload,
            }),
        }
    }
}

/// An event in flight, carrying its routing metadata. Shared via `Arc`
/// rather than cloned per-handler: the payload is never mutated, so handlers
/// and the observability hook can all borrow the same allocation.
#[derive(Clone)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub session_id: SessionId,
    pub event_type: &'static str,
    pub created_at: DateTime<Utc>,
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("event_id", &self.event_id)
            .field("session_id", &self.session_id)
            .field("event_type", &self.event_type)
            .finish()
    }
}

impl EventEnvelope {
    pub fn new<E: Event>(session_id: SessionId, event_id: EventId, payload: E) -> Self {
        let event_type = payload.message_type();
        Self {
            event_id,
            session_id,
            event_type,
            created_at: Utc::now(),
            payload: Arc::new(payload),
        }
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

/// Outcome of a completed command dispatch. Never constructed by handler
/// code directly — the dispatch engine lifts handler return values and
/// failures into this shape.
#[derive(Clone)]
pub enum CommandOutcome {
    Success(Arc<dyn Any + Send + Sync>),
    Failure {
        error_kind: ErrorKind,
        message: String,
    },
}

impl fmt::Debug for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Success(_) => write!(f, "Success(..)"),
            CommandOutcome::Failure { error_kind, message } => f
                .debug_struct("Failure")
                .field("error_kind", error_kind)
                .field("message", message)
                .finish(),
        }
    }
}

/// `{success, command_id, value | error_kind + message, attempts, metadata}`.
/// Produced exclusively by the dispatch engine.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command_id: CommandId,
    pub outcome: CommandOutcome,
    pub attempts: u32,
    pub metadata: Map<String, Value>,
}

impl CommandResult {
    pub fn success(command_id: CommandId, value: Arc<dyn Any + Send + Sync>, attempts: u32) -> Self {
        Self {
            command_id,
            outcome: CommandOutcome::Success(value),
            attempts,
            metadata: Map::new(),
        }
    }

    pub fn failure(
        command_id: CommandId,
        error_kind: ErrorKind,
        message: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            command_id,
            outcome: CommandOutcome::Failure {
                error_kind,
                message: message.into(),
            },
            attempts,
            metadata: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CommandOutcome::Success(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            CommandOutcome::Failure { error_kind, .. } => Some(*error_kind),
            CommandOutcome::Success(_) => None,
        }
    }

    pub fn value_as<T: 'static>(&self) -> Option<&T> {
        match &self.outcome {
            CommandOutcome::Success(value) => value.downcast_ref::<T>(),
            CommandOutcome::Failure { .. } => None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}
