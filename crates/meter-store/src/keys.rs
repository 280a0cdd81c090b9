//! Key encoding utilities for `RocksDB`.
//!
//! Every table lives in its own column family, so keys are the raw identifier
//! bytes with no prefix.

use meter_core::{BillingCustomerId, BillingSubscriptionId, IdError, UserId};

use crate::error::{Result, StoreError};

/// Create a quota key from a user ID.
#[must_use]
pub fn quota_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a subscription key from a user ID.
#[must_use]
pub fn subscription_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a customer index key.
#[must_use]
pub fn customer_index_key(customer_id: &BillingCustomerId) -> Vec<u8> {
    customer_id.as_bytes().to_vec()
}

/// Create a billing subscription index key.
#[must_use]
pub fn billing_subscription_index_key(subscription_id: &BillingSubscriptionId) -> Vec<u8> {
    subscription_id.as_bytes().to_vec()
}

/// Decode the owning user stored as an index value.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the value is not a valid user ID.
pub fn decode_owner(value: &[u8]) -> Result<UserId> {
    let raw = std::str::from_utf8(value)
        .map_err(|e| StoreError::Serialization(format!("index owner is not UTF-8: {e}")))?;
    UserId::new(raw).map_err(|e: IdError| StoreError::Serialization(e.to_string()))
}
