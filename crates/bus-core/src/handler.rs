//! Handler traits: accepts a single message, returns a result (for commands)
//! or nothing (for events), may suspend on I/O. Expressed as two async
//! traits so commands and events can have different dispatch and resilience
//! treatment even though both close over arbitrary handler state.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::message::{Command, Event};

/// A single-handler responder for commands of type `C`.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    async fn handle(&self, command: C) -> Result<Self::Output, HandlerError>;
}

/// A fan-out observer for events of type `E`. Failure is isolated: it never
/// aborts peer handlers or the batch.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Adapts a plain async closure into a [`CommandHandler`], for the common
/// case of a one-off handler that doesn't need its own struct.
pub struct CommandHandlerFn<C, O, F> {
    f: F,
    _marker: PhantomData<fn(C) -> O>,
}

impl<C, O, F> CommandHandlerFn<C, O, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, O, F, Fut> CommandHandler<C> for CommandHandlerFn<C, O, F>
where
    C: Command,
    O: Send + Sync + 'static,
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
{
    type Output = O;

    async fn handle(&self, command: C) -> Result<Self::Output, HandlerError> {
        (self.f)(command).await
    }
}

/// Adapts a plain async closure into an [`EventHandler`].
pub struct EventHandlerFn<E, F> {
    f: F,
    _marker: PhantomData<fn(&E)>,
}

impl<E, F> EventHandlerFn<E, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E, F> EventHandler<E> for EventHandlerFn<E, F>
where
    E: Event,
    F: for<'a> Fn(&'a E) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync + 'static,
{
    async fn handle(&self, event: &E) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}
