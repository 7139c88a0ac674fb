//! Command middleware and event filters.
//!
//! Command middleware forms a tower-style chain of `(command, next)`
//! continuations built from `futures::future::BoxFuture` — the chain is
//! fixed at bus-build time, so pulling in the `tower` crate's
//! `Service`/load-balancing machinery would buy nothing we need.
//!
//! Event filters run before enqueue and are pure `Fn(&EventEnvelope) ->
//! bool`; the standard filters (type/session/pattern) are constructor
//! functions on the `EventFilter` namespace rather than trait impls, since
//! none of them carry more state than a closure capture.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{CommandEnvelope, CommandResult, EventEnvelope};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The remaining chain, including the terminal handler invocation.
pub type NextMiddleware = Box<dyn FnOnce(CommandEnvelope) -> BoxFuture<'static, CommandResult> + Send>;

/// One link in the command middleware chain (`M1 -> M2 -> ... -> handler`).
/// A middleware may short-circuit by returning its own `CommandResult`
/// without calling `next`, transform the command before forwarding it, or
/// simply observe and pass it through.
#[async_trait]
pub trait CommandMiddleware: Send + Sync {
    async fn handle(&self, command: CommandEnvelope, next: NextMiddleware) -> CommandResult;
}

/// A pure predicate run against every event before it is admitted to the
/// bounded queue. Returning `false` drops the event (short-circuits the
/// ordered AND of the filter chain).
pub type FilterFn = Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>;

/// Constructors for the standard event filters.
pub struct EventFilter;

impl EventFilter {
    /// Allow only events whose `event_type` is in `allowed`.
    pub fn by_type(allowed: HashSet<&'static str>) -> FilterFn {
        Arc::new(move |event: &EventEnvelope| allowed.contains(event.event_type))
    }

    /// Allow only events whose `session_id` is in `allowed`.
    pub fn by_session(allowed: HashSet<crate::ids::SessionId>) -> FilterFn {
        Arc::new(move |event: &EventEnvelope| allowed.contains(&event.session_id))
    }

    /// Allow only events whose `event_type` contains `substring`. A simple
    /// substring match rather than a full glob/regex engine — type-name
    /// pattern matching is as far as this core goes.
    pub fn by_pattern(substring: impl Into<String>) -> FilterFn {
        let substring = substring.into();
        Arc::new(move |event: &EventEnvelope| event.event_type.contains(substring.as_str()))
    }
}

/// Runs the ordered AND of a filter chain; `true` iff every filter passed.
pub(crate) fn run_filters(filters: &[FilterFn], event: &EventEnvelope) -> bool {
    filters.iter().all(|f| f(event))
}
