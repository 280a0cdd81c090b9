//! Free-tier quota types.
//!
//! A [`QuotaRecord`] counts metered calls for one user. The admission rule is
//! [`QuotaRecord::try_consume`]: admit and increment when `count < limit`,
//! otherwise deny without mutating. Storage backends run this rule inside their
//! own atomic section; nothing here is concurrency-aware by itself.

use std::num::NonZeroU64;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MeterError;
use crate::UserId;

/// The maximum number of admitted calls for a user, as resolved by the caller.
///
/// Always positive. Paid callers normally skip the quota check entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct QuotaLimit(NonZeroU64);

impl QuotaLimit {
    /// Create a limit.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::InvalidLimit` if `limit` is zero.
    pub fn new(limit: u64) -> Result<Self, MeterError> {
        NonZeroU64::new(limit)
            .map(Self)
            .ok_or(MeterError::InvalidLimit(limit))
    }

    /// Return the limit as a plain integer.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl TryFrom<u64> for QuotaLimit {
    type Error = MeterError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QuotaLimit> for u64 {
    fn from(limit: QuotaLimit) -> Self {
        limit.get()
    }
}

/// Per-user call counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// The user this counter belongs to.
    pub user_id: UserId,

    /// Number of admitted calls since creation or the last reset.
    pub count: u64,

    /// When the record was first created.
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated. Assigned by the store.
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    /// Create a zeroed record.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Admit one call if the counter is below `limit`.
    ///
    /// On admission the counter is incremented and `updated_at` is set to
    /// `now`. A denied call leaves the record untouched.
    pub fn try_consume(&mut self, limit: QuotaLimit, now: DateTime<Utc>) -> QuotaDecision {
        if self.count < limit.get() {
            let decision = QuotaDecision::admitted(self.count, limit);
            self.count += 1;
            self.updated_at = now;
            decision
        } else {
            QuotaDecision::denied(self.count, limit)
        }
    }

    /// Zero the counter.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.count = 0;
        self.updated_at = now;
    }

    /// Calls still available under `limit`.
    #[must_use]
    pub fn remaining(&self, limit: QuotaLimit) -> u64 {
        limit.get().saturating_sub(self.count)
    }
}

/// Result of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    /// Whether the call was admitted (and recorded).
    pub allowed: bool,

    /// Calls that were available before this call was evaluated.
    pub remaining_before_call: u64,

    /// Counter value after evaluation.
    pub count: u64,
}

impl QuotaDecision {
    /// Decision for an admitted call, given the counter value before the increment.
    #[must_use]
    pub fn admitted(count_before: u64, limit: QuotaLimit) -> Self {
        Self {
            allowed: true,
            remaining_before_call: limit.get().saturating_sub(count_before),
            count: count_before + 1,
        }
    }

    /// Decision for a denied call, given the current counter value.
    #[must_use]
    pub fn denied(count: u64, limit: QuotaLimit) -> Self {
        Self {
            allowed: false,
            remaining_before_call: limit.get().saturating_sub(count),
            count,
        }
    }
}
