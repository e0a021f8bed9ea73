//! dexstream-sink — durable store, cache, and the batching sink writer.
//!
//! Backends:
//! - [`store::MemoryEventStore`] — in-memory (dev/testing, no persistence)
//! - `clickhouse` — columnar analytical store (feature: `clickhouse`)
//! - `redis` — latest-state cache, checkpoint store, and live event
//!   publishing (feature: `redis`)
//!
//! The [`SinkWriter`] consumes decoded events in per-entity order, batches
//! them, writes them idempotently, updates the cache best-effort, and only
//! then advances the checkpoint.

pub mod batcher;
pub mod cache;
pub mod error;
pub mod retry;
pub mod store;
pub mod writer;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

#[cfg(feature = "redis")]
pub mod redis;

pub use batcher::EventBatcher;
pub use cache::{EventPublisher, MemoryStateCache, StateCache};
pub use error::SinkError;
pub use retry::{CommitRetryConfig, CommitRetryPolicy};
pub use store::{DeadLetter, EventStore, MemoryEventStore};
pub use writer::{CommitOutcome, SinkWriter};

#[cfg(feature = "clickhouse")]
pub use crate::clickhouse::ClickhouseEventStore;

#[cfg(feature = "redis")]
pub use crate::redis::{RedisCheckpointStore, RedisStateCache};
