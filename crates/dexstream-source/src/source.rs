//! `UpdateSource` trait — abstraction over stream and poll acquisition.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use dexstream_core::{Checkpoint, RawUpdate, SourceFilter};

use crate::error::SourceError;

/// A stream of raw updates from one source adapter.
///
/// `Err` items are transient source problems surfaced for observability;
/// the adapter keeps the stream alive and reconnects on its own.
pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<RawUpdate, SourceError>> + Send>>;

/// Abstracts over the push-stream and poll/crawl acquisition modes.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Short name for logs (`"ws"`, `"poll"`).
    fn name(&self) -> &'static str;

    /// Connect and start producing raw updates for `filter`, resuming
    /// after `resume` when a checkpoint exists.
    ///
    /// A replay window of updates at or below the checkpoint is allowed;
    /// they are discarded downstream. Only configuration problems fail
    /// here — connectivity is retried internally, forever.
    async fn open(
        &self,
        filter: &SourceFilter,
        resume: Option<Checkpoint>,
    ) -> Result<UpdateStream, SourceError>;
}
