//! Error types for the collaborator clients.

use std::time::Duration;

/// Result type for collaborator operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Failures talking to the model-serving collaborator.
///
/// `Timeout` is kept separate from `Unavailable` because callers treat them
/// differently: a timeout bounds one request and the orchestrator degrades
/// to an empty result, while repeated unavailability usually means the
/// service is down and is worth surfacing to the operator.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The collaborator did not answer within the configured bound.
    #[error("collaborator did not respond within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The collaborator could not be reached or returned an error status.
    #[error("collaborator unavailable: {source}")]
    Unavailable {
        #[source]
        source: reqwest::Error,
    },

    /// The collaborator answered with a payload we cannot use.
    #[error("malformed collaborator response: {message}")]
    InvalidResponse { message: String },
}

impl EmbedError {
    /// Classify a transport error, splitting timeouts from other failures.
    pub(crate) fn from_request(source: reqwest::Error, timeout: Duration) -> Self {
        if source.is_timeout() {
            Self::Timeout { timeout }
        } else {
            Self::Unavailable { source }
        }
    }

    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}
