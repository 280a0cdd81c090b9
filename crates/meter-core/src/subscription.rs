//! Subscription snapshot and billing event reconciliation.
//!
//! The billing provider delivers events at least once and in any order. Each
//! event carries an [`EventSequence`] (the provider's notion of recency); a
//! [`SubscriptionRecord`] remembers the sequence of the last event it applied
//! and only moves forward. [`reconcile`] is the pure decision function that
//! every storage backend evaluates inside its per-user atomic section.
//!
//! # Lifecycle
//!
//! ```text
//! Free ──event──▶ Active ──renewal──▶ Active
//!                   │                   │
//!                   ▼                   ▼
//!            Expired/Canceled ──resubscribe──▶ Active
//! ```
//!
//! `Free` means no record exists. Cancellation is an event whose
//! `current_period_end` is in the past or null; records are never deleted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingCustomerId, BillingSubscriptionId, UserId};

/// Provider-assigned recency marker of a billing event.
///
/// Typically the provider's event creation timestamp or a monotonic counter.
/// Unrelated to the store's `updated_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSequence(pub i64);

impl EventSequence {
    /// Return the raw sequence value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized notification from the billing provider.
///
/// The intake layer verifies the event's origin and resolves `user_id` before
/// handing it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    /// The user the event applies to.
    pub user_id: UserId,

    /// Provider customer identifier. Every event carries it, so the first
    /// applied event establishes it whatever the delivery order.
    pub billing_customer_id: BillingCustomerId,

    /// Provider subscription identifier. Required for the same reason.
    pub billing_subscription_id: BillingSubscriptionId,

    /// Plan identifier; `None` clears the plan.
    #[serde(default)]
    pub plan_id: Option<String>,

    /// End of the paid period; `None` or a past instant means not active.
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,

    /// Provider recency marker.
    pub event_sequence: EventSequence,
}

/// The authoritative subscription snapshot for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Owning user.
    pub user_id: UserId,

    /// Provider customer identifier. Immutable once set.
    pub billing_customer_id: Option<BillingCustomerId>,

    /// Provider subscription identifier. Immutable once set.
    pub billing_subscription_id: Option<BillingSubscriptionId>,

    /// Current plan.
    pub plan_id: Option<String>,

    /// End of the paid period.
    pub current_period_end: Option<DateTime<Utc>>,

    /// Sequence of the last applied event.
    pub event_sequence: EventSequence,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated. Assigned by the store.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Whether the user is on an active paid period at `now`.
    ///
    /// True iff `current_period_end` is set and strictly after `now`.
    #[must_use]
    pub fn is_active_paid(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end.is_some_and(|end| end > now)
    }

    /// Lifecycle state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> SubscriptionState {
        if self.is_active_paid(now) {
            SubscriptionState::Active
        } else {
            SubscriptionState::Expired
        }
    }
}

/// Derived lifecycle state of a user's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No subscription record exists.
    Free,

    /// The paid period ends in the future.
    Active,

    /// The period ended, was cleared, or was canceled.
    Expired,
}

impl SubscriptionState {
    /// State of a possibly missing record at `now`.
    #[must_use]
    pub fn of(record: Option<&SubscriptionRecord>, now: DateTime<Utc>) -> Self {
        record.map_or(Self::Free, |r| r.state(now))
    }
}

/// Which billing identifier a conflict concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    /// `billing_customer_id`.
    Customer,

    /// `billing_subscription_id`.
    Subscription,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => f.write_str("billing_customer_id"),
            Self::Subscription => f.write_str("billing_subscription_id"),
        }
    }
}

/// A billing identifier that cannot be merged.
///
/// Either the user's record already holds a different identifier, or the
/// identifier belongs to another user (an upstream routing bug).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConflict {
    /// The conflicting field.
    pub field: IdentityField,

    /// The user currently holding `existing`.
    pub owner: UserId,

    /// The identifier already recorded.
    pub existing: String,

    /// The identifier the rejected event carried.
    pub incoming: String,
}

impl IdentityConflict {
    /// A billing identifier that is already recorded for another user.
    #[must_use]
    pub fn shared(field: IdentityField, owner: UserId, id: &str) -> Self {
        Self {
            field,
            owner,
            existing: id.to_owned(),
            incoming: id.to_owned(),
        }
    }
}

impl fmt::Display for IdentityConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} is held by {}, event carried {}",
            self.field, self.existing, self.owner, self.incoming
        )
    }
}

/// Why an event was or was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyReason {
    /// First event for the user; the record was created.
    Created,

    /// The record was updated.
    Updated,

    /// The event is not newer than the last applied one. Expected on replay.
    Stale {
        /// Sequence currently recorded.
        last_sequence: EventSequence,
    },

    /// The event's billing identity contradicts recorded state.
    IdentityConflict(IdentityConflict),
}

/// Result of applying a billing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Whether the record changed.
    pub applied: bool,

    /// Why.
    pub reason: ApplyReason,
}

impl ApplyOutcome {
    /// Outcome for an event that changed the record.
    #[must_use]
    pub const fn applied(reason: ApplyReason) -> Self {
        Self {
            applied: true,
            reason,
        }
    }

    /// Outcome for an event that left the record untouched.
    #[must_use]
    pub const fn rejected(reason: ApplyReason) -> Self {
        Self {
            applied: false,
            reason,
        }
    }

    /// Whether the event was a stale replay.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self.reason, ApplyReason::Stale { .. })
    }

    /// Whether the event was rejected for an identity conflict.
    #[must_use]
    pub const fn is_identity_conflict(&self) -> bool {
        matches!(self.reason, ApplyReason::IdentityConflict(_))
    }
}

/// The field values a qualifying event writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Owning user.
    pub user_id: UserId,

    /// Resulting customer identifier.
    pub billing_customer_id: BillingCustomerId,

    /// Resulting subscription identifier.
    pub billing_subscription_id: BillingSubscriptionId,

    /// Resulting plan.
    pub plan_id: Option<String>,

    /// Resulting period end.
    pub current_period_end: Option<DateTime<Utc>>,

    /// Sequence of the event being applied.
    pub event_sequence: EventSequence,

    /// The customer identifier is set by this event for the first time.
    pub claims_customer: bool,

    /// The subscription identifier is set by this event for the first time.
    pub claims_subscription: bool,
}

impl SubscriptionChange {
    /// Customer identifier this change establishes, if any.
    ///
    /// Backends must check it is not owned by another user before writing.
    #[must_use]
    pub fn claimed_customer(&self) -> Option<&BillingCustomerId> {
        self.claims_customer.then_some(&self.billing_customer_id)
    }

    /// Subscription identifier this change establishes, if any.
    #[must_use]
    pub fn claimed_subscription(&self) -> Option<&BillingSubscriptionId> {
        self.claims_subscription
            .then_some(&self.billing_subscription_id)
    }

    /// Build the record to persist, keeping `created_at` of an existing record.
    #[must_use]
    pub fn into_record(
        self,
        existing: Option<&SubscriptionRecord>,
        now: DateTime<Utc>,
    ) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id: self.user_id,
            billing_customer_id: Some(self.billing_customer_id),
            billing_subscription_id: Some(self.billing_subscription_id),
            plan_id: self.plan_id,
            current_period_end: self.current_period_end,
            event_sequence: self.event_sequence,
            created_at: existing.map_or(now, |r| r.created_at),
            updated_at: now,
        }
    }
}

/// Decision of [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Persist `change`; report `reason` (`Created` or `Updated`).
    Write {
        /// Values to write.
        change: SubscriptionChange,
        /// `Created` or `Updated`.
        reason: ApplyReason,
    },

    /// Leave the record as is.
    Skip(ApplyReason),
}

/// Decide how `event` merges into the user's `existing` record.
///
/// Rules, in order:
/// 1. An event whose sequence is not strictly newer than the recorded one is
///    `Stale`.
/// 2. A billing identifier that differs from the recorded one is an
///    `IdentityConflict`.
/// 3. Otherwise the event's plan and period replace the recorded ones, and
///    identifiers missing on the record are established.
///
/// Because every event carries both identifiers, the record reached from a set
/// of consistent events does not depend on their delivery order.
///
/// Ownership of newly established identifiers by *other* users is a storage
/// concern (uniqueness index); see [`SubscriptionChange::claimed_customer`].
#[must_use]
pub fn reconcile(existing: Option<&SubscriptionRecord>, event: &BillingEvent) -> Reconciliation {
    if let Some(record) = existing {
        if event.event_sequence <= record.event_sequence {
            return Reconciliation::Skip(ApplyReason::Stale {
                last_sequence: record.event_sequence,
            });
        }
    }

    let (billing_customer_id, claims_customer) = match merge_identity(
        existing.and_then(|r| r.billing_customer_id.as_ref()),
        &event.billing_customer_id,
        IdentityField::Customer,
        &event.user_id,
    ) {
        Ok(merged) => merged,
        Err(conflict) => return Reconciliation::Skip(ApplyReason::IdentityConflict(conflict)),
    };

    let (billing_subscription_id, claims_subscription) = match merge_identity(
        existing.and_then(|r| r.billing_subscription_id.as_ref()),
        &event.billing_subscription_id,
        IdentityField::Subscription,
        &event.user_id,
    ) {
        Ok(merged) => merged,
        Err(conflict) => return Reconciliation::Skip(ApplyReason::IdentityConflict(conflict)),
    };

    let reason = if existing.is_some() {
        ApplyReason::Updated
    } else {
        ApplyReason::Created
    };

    Reconciliation::Write {
        change: SubscriptionChange {
            user_id: event.user_id.clone(),
            billing_customer_id,
            billing_subscription_id,
            plan_id: event.plan_id.clone(),
            current_period_end: event.current_period_end,
            event_sequence: event.event_sequence,
            claims_customer,
            claims_subscription,
        },
        reason,
    }
}

/// Merge one write-once identifier. Returns the resulting value and whether it
/// is newly established.
fn merge_identity<T>(
    recorded: Option<&T>,
    incoming: &T,
    field: IdentityField,
    user_id: &UserId,
) -> Result<(T, bool), IdentityConflict>
where
    T: Clone + PartialEq + AsRef<str>,
{
    match recorded {
        Some(current) if current != incoming => Err(IdentityConflict {
            field,
            owner: user_id.clone(),
            existing: current.as_ref().to_owned(),
            incoming: incoming.as_ref().to_owned(),
        }),
        Some(_) => Ok((incoming.clone(), false)),
        None => Ok((incoming.clone(), true)),
    }
}
