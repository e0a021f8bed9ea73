//! `SinkWriter` — commits batches of decoded events.
//!
//! Commit order is fixed: durable store first (retried with backoff up to
//! the ceiling), then best-effort cache and publish, then the checkpoint.
//! A batch that exhausts its retries is dead-lettered and freezes the
//! checkpoint: later batches still reach the store (idempotently) but the
//! committed position stops moving, which is the externally observable
//! stall.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time;
use tracing::{debug, error, info, warn};

use dexstream_core::{
    CacheEntry, Checkpoint, CheckpointError, CheckpointManager, DecodedEvent, UpdatePosition,
};

use crate::cache::{EventPublisher, StateCache};
use crate::error::SinkError;
use crate::retry::CommitRetryPolicy;
use crate::store::{DeadLetter, EventStore};

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        events: usize,
        checkpoint_advanced: bool,
    },
    DeadLettered {
        events: usize,
    },
}

pub struct SinkWriter {
    store: Arc<dyn EventStore>,
    cache: Option<Arc<dyn StateCache>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    checkpoint: CheckpointManager,
    retry: CommitRetryPolicy,
    cache_ttl_secs: u64,
    stalled: bool,
}

impl SinkWriter {
    pub fn new(store: Arc<dyn EventStore>, checkpoint: CheckpointManager) -> Self {
        Self {
            store,
            cache: None,
            publisher: None,
            checkpoint,
            retry: CommitRetryPolicy::default(),
            cache_ttl_secs: 0,
            stalled: false,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn StateCache>, ttl_secs: u64) -> Self {
        self.cache = Some(cache);
        self.cache_ttl_secs = ttl_secs;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_retry(mut self, retry: CommitRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load the saved checkpoint; called once before the source opens.
    pub async fn load_checkpoint(&mut self) -> Result<Option<Checkpoint>, CheckpointError> {
        self.checkpoint.load().await
    }

    /// `true` once a batch has been dead-lettered; the checkpoint no
    /// longer advances.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// The committed checkpoint position, if any.
    pub fn committed(&self) -> Option<UpdatePosition> {
        self.checkpoint.committed()
    }

    /// Commit one batch. All failure handling happens inside; the caller
    /// only learns the outcome.
    pub async fn commit_batch(&mut self, batch: Vec<DecodedEvent>) -> CommitOutcome {
        if batch.is_empty() {
            return CommitOutcome::Committed {
                events: 0,
                checkpoint_advanced: false,
            };
        }
        let events = batch.len();

        // 1. Durable store, retried to the ceiling.
        if let Err(err) = self.insert_with_retry(&batch).await {
            let reason = err.to_string();
            self.dead_letter(&batch, &reason).await;
            self.stalled = true;
            error!(
                events,
                %reason,
                "batch dead-lettered; checkpoint frozen until recovery"
            );
            return CommitOutcome::DeadLettered { events };
        }

        // 2. Best-effort cache of the latest state per entity.
        self.update_cache(&batch).await;

        // 3. Best-effort live publish.
        self.publish(&batch).await;

        // 4. Checkpoint, only after the store write succeeded.
        let max_position = batch
            .iter()
            .map(DecodedEvent::position)
            .max()
            .expect("batch is non-empty");
        let checkpoint_advanced = if self.stalled {
            debug!("sink stalled, not advancing checkpoint");
            false
        } else {
            match self.checkpoint.advance(max_position).await {
                Ok(advanced) => advanced,
                Err(e) => {
                    // The position is retried with the next batch.
                    warn!(error = %e, "checkpoint save failed");
                    false
                }
            }
        };

        debug!(events, checkpoint_advanced, "batch committed");
        CommitOutcome::Committed {
            events,
            checkpoint_advanced,
        }
    }

    async fn insert_with_retry(&self, batch: &[DecodedEvent]) -> Result<(), SinkError> {
        let mut attempt = 0u32;
        loop {
            match self.store.insert_events(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            warn!(
                                attempt,
                                max_retries = self.retry.max_retries(),
                                error = %e,
                                "store write failed, retrying in {delay:?}"
                            );
                            time::sleep(delay).await;
                        }
                        None => {
                            return Err(SinkError::RetriesExhausted {
                                attempts: attempt,
                                reason: e.to_string(),
                            })
                        }
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, batch: &[DecodedEvent], reason: &str) {
        let mut letters = Vec::with_capacity(batch.len());
        for event in batch {
            match DeadLetter::from_event(event, reason) {
                Ok(letter) => letters.push(letter),
                Err(e) => error!(error = %e, "failed to serialize dead letter"),
            }
        }
        if let Err(e) = self.store.insert_dead_letters(&letters).await {
            // Worst case: the batch survives only in logs.
            error!(error = %e, events = batch.len(), "dead-letter write failed");
        } else {
            info!(events = letters.len(), "batch preserved as dead letters");
        }
    }

    async fn update_cache(&self, batch: &[DecodedEvent]) {
        let Some(cache) = &self.cache else { return };

        // Latest snapshot-bearing event per entity wins.
        let mut latest: HashMap<&str, &DecodedEvent> = HashMap::new();
        for event in batch.iter().filter(|e| e.state.is_some()) {
            latest
                .entry(event.entity.as_str())
                .and_modify(|current| {
                    if event.position() > current.position() {
                        *current = event;
                    }
                })
                .or_insert(event);
        }

        for event in latest.into_values() {
            let entry = CacheEntry {
                entity: event.entity.clone(),
                state: event.state.clone().expect("filtered on state"),
                updated_at_slot: event.slot,
            };
            if let Err(e) = cache.put(&entry, self.cache_ttl_secs).await {
                warn!(entity = %entry.entity, error = %e, "cache write failed");
            }
        }
    }

    async fn publish(&self, batch: &[DecodedEvent]) {
        let Some(publisher) = &self.publisher else { return };
        for event in batch {
            // Best-effort per event; one bad publish must not skip the rest.
            if let Err(e) = publisher.publish(event).await {
                warn!(entity = %event.entity, error = %e, "event publish failed");
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
