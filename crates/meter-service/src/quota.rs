//! The quota ledger.
//!
//! `QuotaLedger` answers "may this free-tier user make one more metered call?"
//! and records the call in the same atomic step. The atomicity itself is the
//! store's job; the ledger adds the call deadline and logging, and never
//! retries.
//!
//! Callers must treat any error as "not verifiable" and deny the action.

use std::sync::Arc;
use std::time::Duration;

use meter_core::{QuotaDecision, QuotaLimit, QuotaRecord, UserId};
use meter_store::{Store, StoreError};

use crate::deadline::bounded;

/// Per-user metered call counter.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl QuotaLedger {
    /// Create a ledger over `store`, bounding each store call by `deadline`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    /// Admit and record one call if the user is below `limit`.
    ///
    /// Reaching the limit is not an error: the decision has `allowed = false`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the counter could not be consulted or
    /// updated in time. No increment is visible in that case.
    pub async fn try_consume(
        &self,
        user_id: &UserId,
        limit: QuotaLimit,
    ) -> Result<QuotaDecision, StoreError> {
        let decision = bounded(self.deadline, self.store.consume_quota(user_id, limit))
            .await
            .map_err(|e| {
                tracing::warn!(
                    user_id = %user_id,
                    limit = limit.get(),
                    error = %e,
                    "Quota not verifiable, caller must deny"
                );
                e
            })?;

        if decision.allowed {
            tracing::debug!(
                user_id = %user_id,
                limit = limit.get(),
                count = decision.count,
                remaining_before_call = decision.remaining_before_call,
                "Quota call admitted"
            );
        } else {
            tracing::debug!(
                user_id = %user_id,
                limit = limit.get(),
                count = decision.count,
                "Quota exhausted"
            );
        }

        Ok(decision)
    }

    /// Zero the user's counter.
    ///
    /// # Errors
    ///
    /// Returns the store error if the reset could not be applied.
    pub async fn reset(&self, user_id: &UserId) -> Result<QuotaRecord, StoreError> {
        let record = bounded(self.deadline, self.store.reset_quota(user_id))
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %user_id, error = %e, "Quota reset failed");
                e
            })?;

        tracing::info!(user_id = %user_id, "Quota reset");
        Ok(record)
    }

    /// Current counter for the user, if one exists.
    ///
    /// # Errors
    ///
    /// Returns the store error if the counter could not be read.
    pub async fn usage(&self, user_id: &UserId) -> Result<Option<QuotaRecord>, StoreError> {
        bounded(self.deadline, self.store.get_quota(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_store::MemoryStore;

    fn ledger() -> (QuotaLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = QuotaLedger::new(store.clone(), Duration::from_secs(1));
        (ledger, store)
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn admits_exactly_limit_then_denies() {
        let (ledger, _) = ledger();
        let limit = QuotaLimit::new(3).unwrap();
        let u = user("u1");

        for expected_remaining in [3, 2, 1] {
            let d = ledger.try_consume(&u, limit).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining_before_call, expected_remaining);
        }
        for _ in 0..3 {
            assert!(!ledger.try_consume(&u, limit).await.unwrap().allowed);
        }
        assert_eq!(ledger.usage(&u).await.unwrap().unwrap().count, 3);
    }

    #[tokio::test]
    async fn reset_readmits() {
        let (ledger, _) = ledger();
        let limit = QuotaLimit::new(1).unwrap();
        let u = user("u1");

        ledger.try_consume(&u, limit).await.unwrap();
        assert!(!ledger.try_consume(&u, limit).await.unwrap().allowed);

        ledger.reset(&u).await.unwrap();
        assert!(ledger.try_consume(&u, limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let (ledger, _) = ledger();
        let limit = QuotaLimit::new(1).unwrap();

        assert!(ledger.try_consume(&user("a"), limit).await.unwrap().allowed);
        assert!(ledger.try_consume(&user("b"), limit).await.unwrap().allowed);
        assert!(!ledger.try_consume(&user("a"), limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable() {
        let (ledger, store) = ledger();
        store.set_unavailable(true);

        let err = ledger
            .try_consume(&user("u1"), QuotaLimit::new(5).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());

        store.set_unavailable(false);
        assert!(ledger.usage(&user("u1")).await.unwrap().is_none());
    }
}
