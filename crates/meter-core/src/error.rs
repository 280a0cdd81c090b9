//! Error types for meter.

/// Result type for meter core operations.
pub type Result<T> = std::result::Result<T, MeterError>;

/// Validation errors raised while building core values.
#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    /// Quota limits must be positive.
    #[error("invalid quota limit: {0} (must be positive)")]
    InvalidLimit(u64),
}
