//! The subscription reconciler.
//!
//! `SubscriptionReconciler` merges billing-provider events into the user's
//! subscription snapshot. Events may arrive twice or out of order; the store
//! applies [`meter_core::reconcile`] atomically per user, so the final snapshot
//! depends only on the set of events delivered, not on their order.
//!
//! Store failures are returned unchanged. Event intake can retry them safely
//! because applying an event is idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use meter_core::{
    ApplyOutcome, ApplyReason, BillingEvent, SubscriptionRecord, SubscriptionState, UserId,
};
use meter_store::{Store, StoreError};

use crate::deadline::bounded;

/// A user's subscription as seen at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// The user.
    pub user_id: UserId,
    /// Lifecycle state at `evaluated_at`.
    pub state: SubscriptionState,
    /// Whether the user is on an active paid period.
    pub active_paid: bool,
    /// When the state was evaluated.
    pub evaluated_at: DateTime<Utc>,
    /// The stored record, if any.
    pub record: Option<SubscriptionRecord>,
}

/// Applies billing events to subscription records.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl SubscriptionReconciler {
    /// Create a reconciler over `store`, bounding each store call by `deadline`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    /// Merge one billing event.
    ///
    /// Stale replays and identity conflicts are outcomes, not errors.
    ///
    /// # Errors
    ///
    /// Returns the store error if the merge could not be performed; the record
    /// is unchanged and the event may be retried.
    pub async fn apply_event(&self, event: &BillingEvent) -> Result<ApplyOutcome, StoreError> {
        let outcome = bounded(self.deadline, self.store.merge_subscription(event))
            .await
            .map_err(|e| {
                tracing::warn!(
                    user_id = %event.user_id,
                    event_sequence = %event.event_sequence,
                    error = %e,
                    "Billing event not applied, retry later"
                );
                e
            })?;

        match &outcome.reason {
            ApplyReason::Created | ApplyReason::Updated => tracing::info!(
                user_id = %event.user_id,
                event_sequence = %event.event_sequence,
                plan_id = ?event.plan_id,
                current_period_end = ?event.current_period_end,
                reason = ?outcome.reason,
                "Billing event applied"
            ),
            ApplyReason::Stale { last_sequence } => tracing::info!(
                user_id = %event.user_id,
                event_sequence = %event.event_sequence,
                last_sequence = %last_sequence,
                "Stale billing event ignored"
            ),
            ApplyReason::IdentityConflict(conflict) => tracing::error!(
                user_id = %event.user_id,
                event_sequence = %event.event_sequence,
                field = %conflict.field,
                owner = %conflict.owner,
                existing = %conflict.existing,
                incoming = %conflict.incoming,
                "Billing identity conflict, manual review required"
            ),
        }

        Ok(outcome)
    }

    /// The stored subscription record for a user.
    ///
    /// # Errors
    ///
    /// Returns the store error if the record could not be read.
    pub async fn subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        bounded(self.deadline, self.store.get_subscription(user_id)).await
    }

    /// The user's subscription state evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the record could not be read.
    pub async fn status(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionStatus, StoreError> {
        let record = self.subscription(user_id).await?;
        let state = SubscriptionState::of(record.as_ref(), now);

        Ok(SubscriptionStatus {
            user_id: user_id.clone(),
            state,
            active_paid: state == SubscriptionState::Active,
            evaluated_at: now,
            record,
        })
    }
}
