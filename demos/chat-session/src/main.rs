//! # Chat Session Demo
//!
//! Opens a session per chat participant, registers a session-scoped handler
//! that only sees messages from its own session, and shows that closing the
//! session unregisters the handler and fires `SessionEnd` for cleanup.

use std::time::Duration;

use anyhow::Result;
use bus_core::{async_trait, BusBuilder, Event, EventHandler, HandlerError, Scope, SessionEnd};

#[derive(Debug, Clone)]
struct MessageSent {
    from: String,
    body: String,
}

impl Event for MessageSent {}

struct TranscriptHandler {
    participant: String,
}

#[async_trait]
impl EventHandler<MessageSent> for TranscriptHandler {
    async fn handle(&self, event: &MessageSent) -> Result<(), HandlerError> {
        println!("[{}'s transcript] {}: {}", self.participant, event.from, event.body);
        Ok(())
    }
}

struct SessionEndWatcher;

#[async_trait]
impl EventHandler<SessionEnd> for SessionEndWatcher {
    async fn handle(&self, event: &SessionEnd) -> Result<(), HandlerError> {
        println!("session {} ended at {}", event.session_id, event.ended_at);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let bus = BusBuilder::new().build();
    bus.start().await;
    let handle = bus.handle();

    // Watches every session close, bus-wide.
    handle.register_event_handler(SessionEndWatcher, Scope::Bus, 0, None)?;

    let alice = handle.open_session(Some("alice".into())).await;
    let bob = handle.open_session(Some("bob".into())).await;

    // Session-scoped: only sees messages published into alice's session.
    handle.register_event_handler(
        TranscriptHandler {
            participant: "alice".to_string(),
        },
        Scope::session(alice.session_id().clone()),
        0,
        None,
    )?;
    handle.register_event_handler(
        TranscriptHandler {
            participant: "bob".to_string(),
        },
        Scope::session(bob.session_id().clone()),
        0,
        None,
    )?;

    handle
        .publish(
            alice.session_id().clone(),
            MessageSent {
                from: "alice".to_string(),
                body: "hey bob".to_string(),
            },
        )
        .await;
    handle
        .publish(
            bob.session_id().clone(),
            MessageSent {
                from: "bob".to_string(),
                body: "hey alice".to_string(),
            },
        )
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Closing alice's session tears down her transcript handler; bob's
    // keeps receiving messages afterward.
    alice.close().await;

    handle
        .publish(
            bob.session_id().clone(),
            MessageSent {
                from: "bob".to_string(),
                body: "you still there?".to_string(),
            },
        )
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    bus.stop(Duration::from_secs(1)).await;
    Ok(())
}
