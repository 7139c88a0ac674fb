//! The error taxonomy.
//!
//! `BusError` is the one error type the public API raises synchronously
//! (registration errors only — everything else is lifted into a
//! `CommandResult`, an `EventHandlerFailed` event, or a metrics counter).
//! `Categorizable` lets the resilience layer ask "is this worth retrying?"
//! without matching every variant itself.

use std::fmt;

use crate::ids::Scope;

/// An error "kind" as carried by `CommandResult` — `Copy` so results can be
/// cheaply inspected without cloning a whole error tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoHandler,
    DuplicateHandler,
    InvalidScope,
    QueueFull,
    HandlerFailure,
    CircuitOpen,
    Timeout,
    Cancelled,
    ShuttingDown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NoHandler => "no_handler",
            ErrorKind::DuplicateHandler => "duplicate_handler",
            ErrorKind::InvalidScope => "invalid_scope",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::HandlerFailure => "handler_failure",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// Errors raised synchronously to callers. Registration errors
/// (`DuplicateHandler`, `InvalidScope`) are programmer errors; the rest are
/// runtime conditions lifted into this type when a caller needs to observe
/// them outside the `CommandResult`/event-metrics channels (e.g. from
/// `publish`'s `Result`).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no handler registered for command type {0:?} in scope {1}")]
    NoHandler(&'static str, Scope),

    #[error("handler already registered for command type {0:?} in scope {1}")]
    DuplicateHandler(&'static str, Scope),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("queue full: {0}")]
    QueueFull(&'static str),

    #[error("handler failed: {0}")]
    HandlerFailure(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("bus is shutting down")]
    ShuttingDown,
}

/// Error classification used by the resilience layer to decide whether a
/// registration-time error should be raised synchronously (`Programmer`) or
/// whether a runtime error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeErrorCategory {
    Programmer,
    Runtime,
    Backpressure,
    Resilience,
}

pub trait Categorizable {
    fn category(&self) -> SafeErrorCategory;
    fn is_retryable(&self) -> bool;
    fn error_kind(&self) -> ErrorKind;
}

impl Categorizable for BusError {
    fn category(&self) -> SafeErrorCategory {
        match self {
            BusError::NoHandler(..) | BusError::DuplicateHandler(..) | BusError::InvalidScope(_) => {
                SafeErrorCategory::Programmer
            }
            BusError::QueueFull(_) => SafeErrorCategory::Backpressure,
            BusError::CircuitOpen(_) => SafeErrorCategory::Resilience,
            BusError::HandlerFailure(_)
            | BusError::Timeout
            | BusError::Cancelled
            | BusError::ShuttingDown => SafeErrorCategory::Runtime,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::HandlerFailure(_) | BusError::Timeout
        )
    }

    fn error_kind(&self) -> ErrorKind {
        match self {
            BusError::NoHandler(..) => ErrorKind::NoHandler,
            BusError::DuplicateHandler(..) => ErrorKind::DuplicateHandler,
            BusError::InvalidScope(_) => ErrorKind::InvalidScope,
            BusError::QueueFull(_) => ErrorKind::QueueFull,
            BusError::HandlerFailure(_) => ErrorKind::HandlerFailure,
            BusError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            BusError::Timeout => ErrorKind::Timeout,
            BusError::Cancelled => ErrorKind::Cancelled,
            BusError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// The error type handler implementations return. Boxed rather than generic
/// so the registry can store handlers of unrelated error types uniformly.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
