//! # Order Pipeline Demo
//!
//! Places orders through a command handler, reacts to the resulting event
//! with two independent handlers (shipping, notifications), and shows a
//! flaky downstream handler recovering via the bus's retry + circuit
//! breaker resilience.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use bus_core::{async_trait, BusBuilder, Command, CommandHandler, Event, EventHandler, HandlerError, Scope};

// ============================================================================
// Commands (intent)
// ============================================================================

#[derive(Debug, Clone)]
struct PlaceOrder {
    sku: String,
    quantity: u32,
}

impl Command for PlaceOrder {}

#[derive(Debug, Clone)]
struct OrderConfirmation {
    order_id: String,
    sku: String,
    quantity: u32,
}

struct PlaceOrderHandler {
    next_order_id: AtomicU32,
}

#[async_trait]
impl CommandHandler<PlaceOrder> for PlaceOrderHandler {
    type Output = OrderConfirmation;

    async fn handle(&self, command: PlaceOrder) -> Result<OrderConfirmation, HandlerError> {
        let id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        Ok(OrderConfirmation {
            order_id: format!("order-{id}"),
            sku: command.sku,
            quantity: command.quantity,
        })
    }
}

// ============================================================================
// Events (facts)
// ============================================================================

#[derive(Debug, Clone)]
struct OrderPlaced {
    order_id: String,
    sku: String,
    quantity: u32,
}

impl Event for OrderPlaced {}

struct ShippingHandler;

#[async_trait]
impl EventHandler<OrderPlaced> for ShippingHandler {
    async fn handle(&self, event: &OrderPlaced) -> Result<(), HandlerError> {
        println!("shipping: scheduling {} x {} for {}", event.quantity, event.sku, event.order_id);
        Ok(())
    }
}

/// Fails its first two invocations per order, then succeeds. Exercises the
/// retry-with-backoff path without the whole demo depending on a flaky
/// network call.
struct FlakyNotificationHandler {
    attempts: AtomicU32,
}

#[async_trait]
impl EventHandler<OrderPlaced> for FlakyNotificationHandler {
    async fn handle(&self, event: &OrderPlaced) -> Result<(), HandlerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        if attempt < 2 {
            return Err(format!("notification service unavailable (attempt {attempt})").into());
        }
        println!("notifications: customer notified about {}", event.order_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let bus = BusBuilder::new().build();
    bus.start().await;
    let handle = bus.handle();

    handle.register_command_handler(
        PlaceOrderHandler {
            next_order_id: AtomicU32::new(1),
        },
        Scope::Bus,
    )?;
    handle.register_event_handler(ShippingHandler, Scope::Bus, 0, None)?;
    handle.register_event_handler(
        FlakyNotificationHandler {
            attempts: AtomicU32::new(0),
        },
        Scope::Bus,
        10,
        None,
    )?;

    let session = handle.open_session(None).await;

    for (sku, quantity) in [("widget", 3), ("gadget", 1)] {
        let result = handle
            .execute(
                session.session_id().clone(),
                PlaceOrder {
                    sku: sku.to_string(),
                    quantity,
                },
                Some(Duration::from_secs(2)),
            )
            .await;

        if let Some(confirmation) = result.value_as::<OrderConfirmation>() {
            println!("placed {} for {} x {}", confirmation.order_id, confirmation.quantity, confirmation.sku);
            let placed = OrderPlaced {
                order_id: confirmation.order_id.clone(),
                sku: confirmation.sku.clone(),
                quantity: confirmation.quantity,
            };
            handle.publish(session.session_id().clone(), placed).await;
        } else {
            println!("order for {sku} failed: {:?}", result.error_kind());
        }
    }

    // Give the dispatch loop a moment to drain the fan-out before shutdown.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = handle.get_metrics_snapshot();
    println!("events published: {:?}", snapshot.counters.get("events_published_total{OrderPlaced}"));

    session.close().await;
    bus.stop(Duration::from_secs(1)).await;

    Ok(())
}
