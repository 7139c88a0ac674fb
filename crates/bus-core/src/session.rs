//! Session manager: scoped acquisition of a handler-registration
//! namespace with guaranteed cleanup on every exit path, including
//! cancellation of in-flight `execute` calls for the closing session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::ids::{HandlerKey, SessionId};
use crate::message::EventEnvelope;
use crate::middleware::BoxFuture;
use crate::registry::HandlerRegistry;

/// The thin interface `SessionHandle` needs to publish `SessionStart` /
/// `SessionEnd`, implemented by the dispatch engine. Kept as a trait rather
/// than an `Arc<DispatchEngine>` field to avoid a dependency cycle between
/// `session` and `dispatch`.
pub(crate) trait SessionEventSink: Send + Sync {
    fn publish_internal(&self, event: EventEnvelope) -> BoxFuture<'static, ()>;
}

/// A single in-flight `execute` call's cancellation slot.
struct Inflight {
    session_id: SessionId,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
pub(crate) struct SessionManager {
    registry: Arc<HandlerRegistry>,
    active: DashMap<SessionId, ()>,
    inflight: DashMap<u64, Inflight>,
    next_inflight_id: AtomicU64,
}

impl SessionManager {
    pub(crate) fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            active: DashMap::new(),
            inflight: DashMap::new(),
            next_inflight_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn open(&self, session_id: SessionId) {
        self.active.insert(session_id, ());
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Registers one in-flight `execute` call against `session_id`, so that
    /// closing that session can cancel it. Returns a token to pass back to
    /// [`SessionManager::complete_inflight`] once the call finishes on its
    /// own, and the receiver half to `select!` against.
    pub(crate) fn register_inflight(&self, session_id: &SessionId) -> (u64, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_inflight_id.fetch_add(1, Ordering::Relaxed);
        self.inflight.insert(
            id,
            Inflight {
                session_id: session_id.clone(),
                cancel: tx,
            },
        );
        (id, rx)
    }

    pub(crate) fn complete_inflight(&self, id: u64) {
        self.inflight.remove(&id);
    }

    /// Unregisters every handler owned by `session_id` and cancels every
    /// in-flight `execute` call for it. Returns the removed handler keys for
    /// the caller to log.
    pub(crate) fn close(&self, session_id: &SessionId) -> Vec<HandlerKey> {
        let cancelled: Vec<u64> = self
            .inflight
            .iter()
            .filter(|entry| &entry.value().session_id == session_id)
            .map(|entry| *entry.key())
            .collect();
        for id in cancelled {
            if let Some((_, inflight)) = self.inflight.remove(&id) {
                let _ = inflight.cancel.send(());
            }
        }
        self.active.remove(session_id);
        self.registry.unregister_scope(session_id)
    }
}

/// Scoped acquisition of a session's handler namespace. Implements `Drop`
/// for guaranteed cleanup on an unexpected exit path (a panic unwinding
/// through the scope, or simply forgetting to call `close`); prefer the
/// explicit async `close()` when inside an async context, since `Drop`
/// cannot await the `SessionEnd` publish.
pub struct SessionHandle {
    session_id: SessionId,
    manager: Arc<SessionManager>,
    sink: Arc<dyn SessionEventSink>,
    id_gen: Arc<dyn crate::collaborators::IdGenerator>,
    closed: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        manager: Arc<SessionManager>,
        sink: Arc<dyn SessionEventSink>,
        id_gen: Arc<dyn crate::collaborators::IdGenerator>,
    ) -> Self {
        Self {
            session_id,
            manager,
            sink,
            id_gen,
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Unregisters every handler this session owns, cancels its in-flight
    /// `execute` calls, and publishes `SessionEnd`. Idempotent: a second
    /// call is a no-op.
    pub async fn close(self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.close(&self.session_id);
        let event = EventEnvelope::new(
            self.session_id.clone(),
            crate::ids::EventId::new(self.id_gen.new_id()),
            crate::events::SessionEnd {
                session_id: self.session_id.clone(),
                ended_at: chrono::Utc::now(),
            },
        );
        self.sink.publish_internal(event).await;
        std::mem::forget(self);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.manager.close(&self.session_id);
        tracing::warn!(
            session_id = %self.session_id,
            "session dropped without calling close(); cleanup ran synchronously, SessionEnd publish best-effort"
        );
        let sink = self.sink.clone();
        let event = EventEnvelope::new(
            self.session_id.clone(),
            crate::ids::EventId::new(self.id_gen.new_id()),
            crate::events::SessionEnd {
                session_id: self.session_id.clone(),
                ended_at: chrono::Utc::now(),
            },
        );
        tokio::spawn(async move {
            sink.publish_internal(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        observed: std::sync::Mutex<Vec<&'static str>>,
    }

    impl SessionEventSink for RecordingSink {
        fn publish_internal(&self, event: EventEnvelope) -> BoxFuture<'static, ()> {
            self.observed.lock().unwrap().push(event.event_type);
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_unregisters_handlers() {
        let registry = Arc::new(HandlerRegistry::new());
        let manager = Arc::new(SessionManager::new(registry));
        let sink = Arc::new(RecordingSink {
            observed: std::sync::Mutex::new(Vec::new()),
        });
        let session_id = SessionId::new("s-1");
        manager.open(session_id.clone());
        let handle = SessionHandle::new(
            session_id.clone(),
            manager.clone(),
            sink.clone(),
            Arc::new(crate::collaborators::UuidV4IdGenerator),
        );
        handle.close().await;
        assert_eq!(manager.active_count(), 0);
        assert_eq!(sink.observed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_without_close_still_cleans_up_synchronously() {
        let registry = Arc::new(HandlerRegistry::new());
        let manager = Arc::new(SessionManager::new(registry));
        let sink = Arc::new(RecordingSink {
            observed: std::sync::Mutex::new(Vec::new()),
        });
        let session_id = SessionId::new("s-2");
        manager.open(session_id.clone());
        {
            let handle = SessionHandle::new(
                session_id.clone(),
                manager.clone(),
                sink.clone(),
                Arc::new(crate::collaborators::UuidV4IdGenerator),
            );
            drop(handle);
        }
        assert_eq!(manager.active_count(), 0);
    }
}
