//! Error taxonomy for the pipeline core.

use thiserror::Error;

// ─── DecodeError ──────────────────────────────────────────────────────────────

/// Errors produced by protocol decoders.
///
/// Decode failures never abort the pipeline. `Unrecognized` means the bytes
/// do not belong to the decoder and the update falls through to the next
/// registered one; `Malformed` means the decoder claimed the update but the
/// payload is structurally invalid, so the update is counted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unknown discriminator, unexpected account size, or a version tag this
    /// decoder does not handle.
    #[error("update not recognized by `{decoder}`")]
    Unrecognized { decoder: &'static str },

    /// Recognized but structurally invalid payload (short buffer, bad
    /// length, arithmetic overflow).
    #[error("malformed payload in `{decoder}`: {reason}")]
    Malformed {
        decoder: &'static str,
        reason: String,
    },
}

impl DecodeError {
    pub fn unrecognized(decoder: &'static str) -> Self {
        DecodeError::Unrecognized { decoder }
    }

    pub fn malformed(decoder: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            decoder,
            reason: reason.into(),
        }
    }

    /// `true` for errors that fall through to the next decoder silently.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, DecodeError::Unrecognized { .. })
    }
}

// ─── CheckpointError ──────────────────────────────────────────────────────────

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint store error: {0}")]
    Store(String),
}

// ─── ConfigError ──────────────────────────────────────────────────────────────

/// Fatal configuration problems, detected before anything connects.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{setting}`: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(setting: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            setting,
            reason: reason.into(),
        }
    }
}
