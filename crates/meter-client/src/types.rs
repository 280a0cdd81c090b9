//! Request and response types for the meter API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meter_core::{SubscriptionRecord, SubscriptionState, UserId};

pub use meter_core::{ApplyOutcome, ApplyReason, BillingEvent, IdentityConflict};

/// Request to admit one metered call.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeRequest {
    /// The calling user.
    pub user_id: UserId,
    /// Ceiling for this user; the service default when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Admission decision.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeResponse {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Calls left before this one was counted.
    pub remaining_before_call: u64,
    /// Counter value after the decision.
    pub count: u64,
    /// The limit the service applied.
    pub limit: u64,
}

/// A user's counter.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaUsage {
    /// The user.
    pub user_id: UserId,
    /// Calls recorded since the last reset.
    pub count: u64,
    /// The limit `remaining` is computed against.
    pub limit: u64,
    /// Calls left under `limit`.
    pub remaining: u64,
    /// Last mutation; `None` if the user has never been counted.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A user's subscription and its derived state.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionStatus {
    /// The user.
    pub user_id: UserId,
    /// Lifecycle state at `evaluated_at`.
    pub state: SubscriptionState,
    /// Whether the user is on an active paid period.
    pub active_paid: bool,
    /// When the service evaluated the state.
    pub evaluated_at: DateTime<Utc>,
    /// The stored record, if any.
    pub record: Option<SubscriptionRecord>,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
