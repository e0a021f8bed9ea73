//! `EventStore` trait and the in-memory backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dexstream_core::DecodedEvent;

use crate::error::SinkError;

/// A batch that exhausted its store retries, preserved for recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub idempotency_key: String,
    pub entity: String,
    pub slot: u64,
    pub write_version: u64,
    /// The full event, serialized so nothing is lost.
    pub payload: serde_json::Value,
    pub reason: String,
    pub failed_at: i64,
}

impl DeadLetter {
    pub fn from_event(event: &DecodedEvent, reason: &str) -> Result<Self, SinkError> {
        Ok(Self {
            idempotency_key: event.idempotency_key(),
            entity: event.entity.clone(),
            slot: event.slot,
            write_version: event.write_version,
            payload: serde_json::to_value(event)?,
            reason: reason.to_string(),
            failed_at: chrono::Utc::now().timestamp(),
        })
    }
}

/// Durable, idempotent event storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upsert events by idempotency key. Re-inserting an existing key must
    /// leave exactly one row (insert-or-ignore semantics).
    async fn insert_events(&self, events: &[DecodedEvent]) -> Result<(), SinkError>;

    /// Record a dead-lettered event for manual or external recovery.
    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> Result<(), SinkError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory event store keyed by idempotency key.
///
/// All data is lost when the process exits; for tests and dev pipelines.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<String, DecodedEvent>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct rows (duplicate keys collapse).
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// All stored events for one entity, in (slot, write_version) order.
    pub fn events_for(&self, entity: &str) -> Vec<DecodedEvent> {
        let mut events: Vec<DecodedEvent> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.entity == entity)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.position());
        events
    }

    pub fn get(&self, idempotency_key: &str) -> Option<DecodedEvent> {
        self.events.lock().unwrap().get(idempotency_key).cloned()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_events(&self, events: &[DecodedEvent]) -> Result<(), SinkError> {
        let mut map = self.events.lock().unwrap();
        for event in events {
            // insert-or-ignore: the first write for a key wins.
            map.entry(event.idempotency_key()).or_insert_with(|| event.clone());
        }
        Ok(())
    }

    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> Result<(), SinkError> {
        self.dead_letters.lock().unwrap().extend_from_slice(letters);
        Ok(())
    }
}
