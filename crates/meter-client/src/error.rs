//! Client error types.

use meter_core::IdentityConflict;

/// Errors that can occur when using the meter client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The service could not reach its store. Quota callers must deny;
    /// billing events should be redelivered later.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Error message.
        message: String,
    },

    /// The billing event was rejected for manual review.
    #[error("identity conflict on {}", .0.field)]
    IdentityConflict(IdentityConflict),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            Self::IdentityConflict(_) | Self::Serialization(_) | Self::Configuration(_) => false,
        }
    }
}
