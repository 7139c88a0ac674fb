//! An `ObservabilityHook` that records every event it observes, so tests
//! can assert on what the bus published without wiring up a real sink.

use std::any::Any;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bus_core::{EventEnvelope, ObservabilityHook, SessionId};
use chrono::{DateTime, Utc};

/// A snapshot of one observed event: metadata plus the still-erased
/// payload, so a test can `downcast_ref` it back to the concrete type.
#[derive(Clone)]
pub struct TappedEvent {
    pub event_type: &'static str,
    pub session_id: SessionId,
    pub observed_at: DateTime<Utc>,
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl TappedEvent {
    pub fn downcast_ref<E: 'static>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

/// Records every event passed to `observe`, in order. Cheap to clone;
/// cloning shares the same recording buffer.
#[derive(Clone, Default)]
pub struct EventTap {
    events: Arc<Mutex<Vec<TappedEvent>>>,
}

impl EventTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TappedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.event_type == event_type).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl ObservabilityHook for EventTap {
    async fn observe(&self, event: &EventEnvelope) {
        self.events.lock().unwrap().push(TappedEvent {
            event_type: event.event_type,
            session_id: event.session_id.clone(),
            observed_at: event.created_at,
            payload: Arc::clone(&event.payload),
        });
    }
}
