//! Error types for meter storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within its deadline.
    #[error("store operation timed out after {millis}ms")]
    Timeout {
        /// The deadline that elapsed.
        millis: u64,
    },

    /// A persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether this error means the store could not be consulted.
    ///
    /// Quota callers must deny on these; event senders may retry.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_classification() {
        assert!(StoreError::Unavailable("down".into()).is_unavailable());
        assert!(StoreError::Timeout { millis: 10 }.is_unavailable());
        assert!(!StoreError::Serialization("bad".into()).is_unavailable());
    }

    #[test]
    fn pool_timeout_maps_to_unavailable() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_unavailable());
    }
}
