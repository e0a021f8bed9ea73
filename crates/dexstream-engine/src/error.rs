//! Pipeline-level errors surfaced from `run`.

use thiserror::Error;

use dexstream_core::{CheckpointError, ConfigError};
use dexstream_source::SourceError;

/// Errors that abort the pipeline.
///
/// Only startup problems land here: transient feed and store failures are
/// absorbed by the layers that own them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("source failed to open: {0}")]
    Source(#[from] SourceError),

    #[error("checkpoint load failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}
