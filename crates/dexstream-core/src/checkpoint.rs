//! Checkpoint management — persists the pipeline's committed position.
//!
//! The checkpoint records the highest `(slot, write_version)` the sink has
//! durably committed. On restart the source resumes from it; any replayed
//! updates at or below the checkpoint are discarded by the ordering gate
//! and the store's idempotent writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::types::UpdatePosition;

/// A persisted pipeline position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifies the pipeline deployment that owns this checkpoint.
    pub pipeline_id: String,
    /// Highest durably committed slot.
    pub slot: u64,
    /// Write tiebreaker within that slot.
    pub write_version: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn position(&self) -> UpdatePosition {
        UpdatePosition::new(self.slot, self.write_version)
    }
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore` and the Redis-backed
/// store in `dexstream-sink`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a pipeline (returns `None` if none exists).
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// Delete a checkpoint (resets the pipeline to replay from scratch).
    async fn delete(&self, pipeline_id: &str) -> Result<(), CheckpointError>;
}

/// Owns checkpoint reads/writes for one pipeline and enforces monotonicity.
///
/// `advance` refuses to move the checkpoint backwards, including across
/// restarts: `load` primes the committed position from the store, and every
/// later save must strictly exceed it.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    pipeline_id: String,
    committed: Option<UpdatePosition>,
}

impl CheckpointManager {
    pub fn new(store: Box<dyn CheckpointStore>, pipeline_id: impl Into<String>) -> Self {
        Self {
            store,
            pipeline_id: pipeline_id.into(),
            committed: None,
        }
    }

    /// Load the saved checkpoint and prime the committed position.
    pub async fn load(&mut self) -> Result<Option<Checkpoint>, CheckpointError> {
        let checkpoint = self.store.load(&self.pipeline_id).await?;
        if let Some(cp) = &checkpoint {
            self.committed = Some(cp.position());
        }
        Ok(checkpoint)
    }

    /// Persist `position` if it moves the checkpoint forward.
    ///
    /// Returns `false` (and writes nothing) when `position` does not exceed
    /// the committed position.
    pub async fn advance(&mut self, position: UpdatePosition) -> Result<bool, CheckpointError> {
        if self.committed.map_or(false, |c| position <= c) {
            return Ok(false);
        }
        let checkpoint = Checkpoint {
            pipeline_id: self.pipeline_id.clone(),
            slot: position.slot,
            write_version: position.write_version,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(checkpoint).await?;
        self.committed = Some(position);
        Ok(true)
    }

    /// The committed position, if any update has ever been committed.
    pub fn committed(&self) -> Option<UpdatePosition> {
        self.committed
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral pipelines.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.data.lock().unwrap().get(pipeline_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        self.data
            .lock()
            .unwrap()
            .insert(checkpoint.pipeline_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, pipeline_id: &str) -> Result<(), CheckpointError> {
        self.data.lock().unwrap().remove(pipeline_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Store shared between two managers to simulate a restart.
    struct SharedStore(Arc<MemoryCheckpointStore>);

    #[async_trait]
    impl CheckpointStore for SharedStore {
        async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
            self.0.load(pipeline_id).await
        }
        async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
            self.0.save(checkpoint).await
        }
        async fn delete(&self, pipeline_id: &str) -> Result<(), CheckpointError> {
            self.0.delete(pipeline_id).await
        }
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let mut mgr = CheckpointManager::new(Box::new(MemoryCheckpointStore::new()), "pipe");

        assert!(mgr.load().await.unwrap().is_none());
        assert!(mgr.advance(UpdatePosition::new(1000, 3)).await.unwrap());

        let cp = mgr.load().await.unwrap().unwrap();
        assert_eq!(cp.slot, 1000);
        assert_eq!(cp.write_version, 3);
        assert_eq!(cp.pipeline_id, "pipe");
    }

    #[tokio::test]
    async fn advance_never_goes_backwards() {
        let mut mgr = CheckpointManager::new(Box::new(MemoryCheckpointStore::new()), "pipe");

        assert!(mgr.advance(UpdatePosition::new(100, 5)).await.unwrap());
        // Same position, older write_version, older slot: all refused.
        assert!(!mgr.advance(UpdatePosition::new(100, 5)).await.unwrap());
        assert!(!mgr.advance(UpdatePosition::new(100, 4)).await.unwrap());
        assert!(!mgr.advance(UpdatePosition::new(90, 99)).await.unwrap());

        assert_eq!(mgr.committed(), Some(UpdatePosition::new(100, 5)));
    }

    #[tokio::test]
    async fn monotonic_across_restart() {
        let store = Arc::new(MemoryCheckpointStore::new());

        let mut first = CheckpointManager::new(Box::new(SharedStore(store.clone())), "pipe");
        first.advance(UpdatePosition::new(500, 2)).await.unwrap();
        drop(first);

        let mut second = CheckpointManager::new(Box::new(SharedStore(store)), "pipe");
        let resumed = second.load().await.unwrap().unwrap();
        assert_eq!(resumed.position(), UpdatePosition::new(500, 2));

        // A replayed, older position after restart must not win.
        assert!(!second.advance(UpdatePosition::new(499, 9)).await.unwrap());
        assert!(second.advance(UpdatePosition::new(500, 3)).await.unwrap());
    }
}
