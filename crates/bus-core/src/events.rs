//! The bus's own internal event types, published through the same path as
//! application events so they pick up filters, observability, and the
//! dispatch loop uniformly.

use chrono::{DateTime, Utc};

use crate::ids::{CommandId, SessionId};

/// Published immediately before a resolved command handler runs.
#[derive(Debug, Clone)]
pub struct CommandStarted {
    pub command_id: CommandId,
    pub command_type: &'static str,
    pub session_id: SessionId,
}

#[derive(Debug, Clone)]
pub struct SessionStart {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionEnd {
    pub session_id: SessionId,
    pub ended_at: DateTime<Utc>,
}

/// Reports an event handler's failure without re-dispatching to the failing
/// handler itself. Carries the failing handler's identity string rather
/// than a reference to it.
#[derive(Debug, Clone)]
pub struct EventHandlerFailed {
    pub event_type: &'static str,
    pub session_id: SessionId,
    pub handler_identity: String,
    pub error: String,
}
