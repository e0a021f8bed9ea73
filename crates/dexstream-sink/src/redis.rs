//! Redis backends: latest-state cache, live event publisher, and the
//! checkpoint store.
//!
//! One multiplexed connection serves all three concerns; it is `Clone`
//! and safe to use from the single sink task.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use dexstream_core::{CacheEntry, Checkpoint, CheckpointError, CheckpointStore, DecodedEvent};

use crate::cache::{EventPublisher, StateCache, DEFAULT_EVENTS_CHANNEL, STATE_KEY_PREFIX};
use crate::error::SinkError;

const CHECKPOINT_KEY_PREFIX: &str = "dexstream:checkpoint:";

/// Redis-backed state cache and event publisher.
pub struct RedisStateCache {
    connection: MultiplexedConnection,
    channel: String,
}

impl RedisStateCache {
    /// Connect to `url` and publish events on the default channel.
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        Self::connect_with_channel(url, DEFAULT_EVENTS_CHANNEL).await
    }

    pub async fn connect_with_channel(url: &str, channel: &str) -> Result<Self, SinkError> {
        let client = redis::Client::open(url).map_err(|e| SinkError::Cache(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))?;
        info!(channel, "redis cache connected");
        Ok(Self {
            connection,
            channel: channel.to_string(),
        })
    }

    /// A checkpoint store sharing this connection.
    pub fn checkpoint_store(&self) -> RedisCheckpointStore {
        RedisCheckpointStore {
            connection: self.connection.clone(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl StateCache for RedisStateCache {
    async fn put(&self, entry: &CacheEntry, ttl_secs: u64) -> Result<(), SinkError> {
        let key = format!("{STATE_KEY_PREFIX}{}", entry.entity);
        let value = serde_json::to_string(entry)?;
        let mut conn = self.connection.clone();
        if ttl_secs > 0 {
            conn.set_ex::<_, _, ()>(&key, value, ttl_secs)
                .await
                .map_err(|e| SinkError::Cache(e.to_string()))?;
        } else {
            conn.set::<_, _, ()>(&key, value)
                .await
                .map_err(|e| SinkError::Cache(e.to_string()))?;
        }
        Ok(())
    }

    async fn get(&self, entity: &str) -> Result<Option<CacheEntry>, SinkError> {
        let key = format!("{STATE_KEY_PREFIX}{entity}");
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl EventPublisher for RedisStateCache {
    async fn publish(&self, event: &DecodedEvent) -> Result<i64, SinkError> {
        let message = serde_json::to_string(event)?;
        let mut conn = self.connection.clone();
        let subscribers: i64 = conn
            .publish(&self.channel, message)
            .await
            .map_err(|e| SinkError::Cache(e.to_string()))?;
        Ok(subscribers)
    }
}

// ─── Checkpoint store ─────────────────────────────────────────────────────────

/// Checkpoint persistence at `dexstream:checkpoint:<pipeline_id>`.
pub struct RedisCheckpointStore {
    connection: MultiplexedConnection,
}

impl RedisCheckpointStore {
    pub async fn connect(url: &str) -> Result<Self, CheckpointError> {
        let client =
            redis::Client::open(url).map_err(|e| CheckpointError::Store(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let key = format!("{CHECKPOINT_KEY_PREFIX}{pipeline_id}");
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))?;
        match value {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CheckpointError::Store(e.to_string())),
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let key = format!("{CHECKPOINT_KEY_PREFIX}{}", checkpoint.pipeline_id);
        let value = serde_json::to_string(&checkpoint)
            .map_err(|e| CheckpointError::Store(e.to_string()))?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(&key, value)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))
    }

    async fn delete(&self, pipeline_id: &str) -> Result<(), CheckpointError> {
        let key = format!("{CHECKPOINT_KEY_PREFIX}{pipeline_id}");
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))
    }
}
