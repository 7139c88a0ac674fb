//! # bus-core
//!
//! An in-process, asynchronous message bus for event-driven applications.
//!
//! `bus-core` separates two kinds of messages:
//! - [`Command`] = intent: exactly one handler runs it and returns a result.
//! - [`Event`] = fact: zero or more handlers observe it, fire-and-forget.
//!
//! ## Architecture
//!
//! ```text
//! producer                    BusHandle
//!    │  execute(cmd) ────────────▶ middleware chain ─▶ registry.resolve ─▶ resilience(retry, breaker) ─▶ handler
//!    │                                                        │
//!    │  publish(event) ──▶ filters ──▶ bounded queue ─────────┘
//!    │                                       │
//!    │                              dispatch loop: batch ─▶ priority groups ─▶ concurrent fan-out
//!    ▼
//! ObservabilityHook.observe(event)  (synchronous, before publish() returns)
//! ```
//!
//! ## Key invariants
//!
//! 1. Commands resolve to exactly one handler, session-scoped falling back to bus-scoped.
//! 2. Events fan out to every matching handler; one handler's failure never blocks its peers.
//! 3. The bounded event queue never grows past its configured capacity.
//! 4. A circuit breaker opens after consecutive handler failures and only half-opens after its
//!    recovery timeout.
//! 5. Session close unregisters every handler the session owns and cancels its in-flight commands.
//!
//! ## Example
//!
//! ```ignore
//! use bus_core::{BusBuilder, CommandHandler, HandlerError, Scope};
//! use async_trait::async_trait;
//!
//! #[derive(Debug, Clone)]
//! struct PlaceOrder { sku: String }
//! impl bus_core::Command for PlaceOrder {}
//!
//! struct PlaceOrderHandler;
//!
//! #[async_trait]
//! impl CommandHandler<PlaceOrder> for PlaceOrderHandler {
//!     type Output = String;
//!     async fn handle(&self, cmd: PlaceOrder) -> Result<String, HandlerError> {
//!         Ok(format!("order placed for {}", cmd.sku))
//!     }
//! }
//!
//! # async fn run() {
//! let bus = BusBuilder::new().build();
//! bus.start().await;
//! let handle = bus.handle();
//! handle.register_command_handler(PlaceOrderHandler, Scope::Bus).unwrap();
//! let result = handle.execute("BUS", PlaceOrder { sku: "widget-1".into() }, None).await;
//! assert!(result.is_success());
//! bus.stop(std::time::Duration::from_secs(1)).await;
//! # }
//! ```

mod bus;
mod collaborators;
mod config;
mod dispatch;
mod error;
mod events;
mod handler;
mod ids;
mod message;
mod metrics;
mod middleware;
mod observability;
mod queue;
mod registry;
mod resilience;
mod session;

// Debug auditing for event visibility
#[cfg(debug_assertions)]
mod audit;

// Re-export the bus entry points
pub use bus::{Bus, BusBuilder, BusHandle};

// Re-export configuration
pub use config::BusConfig;

// Re-export the message model
pub use message::{Command, CommandEnvelope, CommandOutcome, CommandResult, Event, EventEnvelope, Message};

// Re-export identifiers and scopes
pub use ids::{CommandId, EventId, HandlerKey, Scope, SessionId};

// Re-export error types
pub use error::{BusError, Categorizable, ErrorKind, HandlerError, SafeErrorCategory};

// Re-export handler traits
pub use handler::{CommandHandler, CommandHandlerFn, EventHandler, EventHandlerFn};

// Re-export middleware and filter types
pub use middleware::{CommandMiddleware, EventFilter, FilterFn, NextMiddleware};

// Re-export resilience configuration and types
pub use resilience::{CircuitBreakerConfig, DeadLetter, RetryConfig};

// Re-export the bounded event queue's public surface
pub use queue::{OverflowPolicy, PutOutcome, QueueConfig, RejectReason};

// Re-export dispatch-level outcomes
pub use dispatch::{DropReason, PublishOutcome};

// Re-export the metrics collector
pub use metrics::{HistogramSnapshot, MetricsSnapshot};

// Re-export observability types
pub use observability::{NoopHook, ObservabilityHook};

// Re-export session types
pub use session::SessionHandle;

// Re-export the bus's own internal event types, so handlers can subscribe to them
pub use events::{CommandStarted, EventHandlerFailed, SessionEnd, SessionStart};

// Re-export collaborator interfaces for callers implementing their own
pub use collaborators::{Clock, FastrandRandom, IdGenerator, Random, SystemClock, UuidV4IdGenerator};

// Debug-only audit log
#[cfg(debug_assertions)]
pub use audit::{AuditEntry, AuditLog};

// Re-export commonly used external types
pub use async_trait::async_trait;
