//! Debug-only event audit trail: a bounded ring buffer of recently
//! dispatched event metadata, for local debugging. Compiled out of release
//! builds entirely — never a production dependency surface.

#![cfg(debug_assertions)]

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::ids::SessionId;
use crate::message::EventEnvelope;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_type: &'static str,
    pub session_id: SessionId,
    pub observed_at: DateTime<Utc>,
}

/// Retains the last `capacity` entries; oldest evicted when full.
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
        }
    }

    pub fn record(&self, envelope: &EventEnvelope) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(AuditEntry {
            event_type: envelope.event_type,
            session_id: envelope.session_id.clone(),
            observed_at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EventId;

    #[derive(Debug)]
    struct Noted;

    #[test]
    fn evicts_oldest_when_full() {
        let log = AuditLog::new(2);
        for i in 0..3 {
            let envelope = EventEnvelope::new(SessionId::bus(), EventId::new(format!("e-{i}")), Noted);
            log.record(&envelope);
        }
        assert_eq!(log.snapshot().len(), 2);
    }
}
