//! `StateCache` and `EventPublisher` traits plus in-memory backends.
//!
//! The cache holds one latest-state snapshot per entity and is strictly a
//! derived read-optimization: every write is best-effort and a failure
//! never blocks the checkpoint. The publisher pushes committed events to
//! live subscribers with the same policy.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use dexstream_core::{CacheEntry, DecodedEvent};

use crate::error::SinkError;

/// Key namespace for latest-state snapshots.
pub const STATE_KEY_PREFIX: &str = "dexstream:state:";

/// Default channel for live event publishing.
pub const DEFAULT_EVENTS_CHANNEL: &str = "dexstream:events";

/// Latest-state snapshot cache, one entry per entity, overwritten in place.
#[async_trait]
pub trait StateCache: Send + Sync {
    /// Upsert the snapshot for `entry.entity`; `ttl_secs` of 0 = no expiry.
    async fn put(&self, entry: &CacheEntry, ttl_secs: u64) -> Result<(), SinkError>;

    /// Fetch the snapshot for an entity.
    async fn get(&self, entity: &str) -> Result<Option<CacheEntry>, SinkError>;
}

/// Live delivery of committed events to downstream subscribers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one committed event; returns the subscriber count.
    async fn publish(&self, event: &DecodedEvent) -> Result<i64, SinkError>;
}

// ─── In-memory backends ───────────────────────────────────────────────────────

/// In-memory cache for tests and dev pipelines. TTLs are ignored.
#[derive(Default)]
pub struct MemoryStateCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    published: Mutex<Vec<DecodedEvent>>,
}

impl MemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Events published so far, in publish order.
    pub fn published(&self) -> Vec<DecodedEvent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateCache for MemoryStateCache {
    async fn put(&self, entry: &CacheEntry, _ttl_secs: u64) -> Result<(), SinkError> {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.entity.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, entity: &str) -> Result<Option<CacheEntry>, SinkError> {
        Ok(self.entries.lock().unwrap().get(entity).cloned())
    }
}

#[async_trait]
impl EventPublisher for MemoryStateCache {
    async fn publish(&self, event: &DecodedEvent) -> Result<i64, SinkError> {
        self.published.lock().unwrap().push(event.clone());
        Ok(1)
    }
}
