//! Source error taxonomy.

use thiserror::Error;

/// Errors produced by a data-source adapter.
///
/// Connectivity errors are transient: the adapter retries them itself with
/// backoff and they never abort the pipeline. `Malformed` covers a single
/// bad message from the remote endpoint (logged and dropped). `Config` is
/// the only fatal class and is raised before anything connects.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not reach the remote endpoint.
    #[error("connection to `{url}` failed: {reason}")]
    Connect { url: String, reason: String },

    /// The connection dropped or an in-flight call failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote endpoint closed the stream.
    #[error("stream closed by remote")]
    Closed,

    /// A single response/notification could not be parsed.
    #[error("malformed message from remote: {0}")]
    Malformed(String),

    /// Invalid endpoint or credentials, detected at startup.
    #[error("source configuration error: {0}")]
    Config(String),
}

impl SourceError {
    pub fn connect(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SourceError::Connect {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// `true` only for startup configuration problems; everything else is
    /// retried or dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(SourceError::Config("bad url".into()).is_fatal());
        assert!(!SourceError::connect("wss://x", "refused").is_fatal());
        assert!(!SourceError::Transport("reset".into()).is_fatal());
        assert!(!SourceError::Malformed("not json".into()).is_fatal());
        assert!(!SourceError::Closed.is_fatal());
    }
}
