//! In-memory storage implementation.
//!
//! All tables sit behind one mutex, which makes every operation trivially
//! atomic within a single process. It offers no durability and no
//! cross-process guarantees; use it for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use meter_core::{
    reconcile, ApplyOutcome, ApplyReason, BillingCustomerId, BillingEvent,
    BillingSubscriptionId, IdentityField, QuotaDecision, QuotaLimit, QuotaRecord,
    Reconciliation, SubscriptionRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::{foreign_owner, Store};

#[derive(Default)]
struct Tables {
    quotas: HashMap<UserId, QuotaRecord>,
    subscriptions: HashMap<UserId, SubscriptionRecord>,
    customers: HashMap<BillingCustomerId, UserId>,
    billing_subscriptions: HashMap<BillingSubscriptionId, UserId>,
}

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every operation fails with
    /// `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn consume_quota(&self, user_id: &UserId, limit: QuotaLimit) -> Result<QuotaDecision> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let record = tables
            .quotas
            .entry(user_id.clone())
            .or_insert_with(|| QuotaRecord::new(user_id.clone(), now));

        Ok(record.try_consume(limit, now))
    }

    async fn reset_quota(&self, user_id: &UserId) -> Result<QuotaRecord> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let record = tables
            .quotas
            .entry(user_id.clone())
            .or_insert_with(|| QuotaRecord::new(user_id.clone(), now));
        record.reset(now);

        Ok(record.clone())
    }

    async fn get_quota(&self, user_id: &UserId) -> Result<Option<QuotaRecord>> {
        Ok(self.lock()?.quotas.get(user_id).cloned())
    }

    async fn merge_subscription(&self, event: &BillingEvent) -> Result<ApplyOutcome> {
        let mut tables = self.lock()?;
        let existing = tables.subscriptions.get(&event.user_id).cloned();

        let (change, reason) = match reconcile(existing.as_ref(), event) {
            Reconciliation::Skip(reason) => return Ok(ApplyOutcome::rejected(reason)),
            Reconciliation::Write { change, reason } => (change, reason),
        };

        if let Some(customer) = change.claimed_customer() {
            let owner = tables.customers.get(customer).cloned();
            if let Some(conflict) =
                foreign_owner(owner, &event.user_id, IdentityField::Customer, customer.as_str())
            {
                return Ok(ApplyOutcome::rejected(ApplyReason::IdentityConflict(conflict)));
            }
        }
        if let Some(subscription) = change.claimed_subscription() {
            let owner = tables.billing_subscriptions.get(subscription).cloned();
            if let Some(conflict) = foreign_owner(
                owner,
                &event.user_id,
                IdentityField::Subscription,
                subscription.as_str(),
            ) {
                return Ok(ApplyOutcome::rejected(ApplyReason::IdentityConflict(conflict)));
            }
        }

        if let Some(customer) = change.claimed_customer() {
            tables
                .customers
                .insert(customer.clone(), event.user_id.clone());
        }
        if let Some(subscription) = change.claimed_subscription() {
            tables
                .billing_subscriptions
                .insert(subscription.clone(), event.user_id.clone());
        }

        let record = change.into_record(existing.as_ref(), Utc::now());
        tables.subscriptions.insert(event.user_id.clone(), record);

        Ok(ApplyOutcome::applied(reason))
    }

    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        Ok(self.lock()?.subscriptions.get(user_id).cloned())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
