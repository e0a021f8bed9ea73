//! Sink error taxonomy.

use thiserror::Error;

/// Errors from the sink side of the pipeline.
///
/// `Store` failures are retried up to the configured ceiling and then
/// surface as `RetriesExhausted` — the only sink error the operator sees.
/// `Cache` and `Checkpoint` failures are logged and absorbed: the cache is
/// a derived read-optimization and the checkpoint retries on the next
/// batch.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A durable-store write failed.
    #[error("store write failed: {0}")]
    Store(String),

    /// The store stayed unreachable past the retry ceiling.
    #[error("store write failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    /// A cache write failed (best-effort, never blocks the checkpoint).
    #[error("cache write failed: {0}")]
    Cache(String),

    /// An event could not be serialized for storage or publishing.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_message_names_the_attempts() {
        let err = SinkError::RetriesExhausted {
            attempts: 5,
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "store write failed after 5 attempts: connection refused"
        );
    }
}
