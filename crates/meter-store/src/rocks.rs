//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait on
//! top of a pessimistic `TransactionDB`. Each operation runs in one transaction
//! that takes an exclusive `get_for_update` lock on the user's row (and, for
//! subscriptions, on the billing identifier index entries it claims), so
//! check-and-write never interleaves with another call for the same user.
//!
//! `RocksDB` is an embedded, single-process database. For deployments with
//! several service replicas use [`crate::PgStore`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, MultiThreaded, Options, TransactionDB,
    TransactionDBOptions,
};

use meter_core::{
    reconcile, ApplyOutcome, ApplyReason, BillingEvent, IdentityField, QuotaDecision,
    QuotaLimit, QuotaRecord, Reconciliation, SubscriptionRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{foreign_owner, Store};

/// How long a transaction waits for a row lock held by another call.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

type Db = TransactionDB<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_lock_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open with a custom row lock timeout.
    ///
    /// A call that cannot take its row lock in time fails with
    /// `StoreError::Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with_lock_timeout<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(i64::try_from(lock_timeout.as_millis()).unwrap_or(i64::MAX));

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors).map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Run a blocking database closure off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Db) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }
}

/// Get a column family handle.
fn cf_handle<'a>(db: &'a Db, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::Unavailable(format!("column family not found: {name}")))
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Serialize a value using CBOR.
fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn consume_quota_txn(db: &Db, user_id: &UserId, limit: QuotaLimit) -> Result<QuotaDecision> {
    let cf = cf_handle(db, cf::QUOTAS)?;
    let key = keys::quota_key(user_id);
    let now = Utc::now();

    let txn = db.transaction();
    let mut record = match txn.get_for_update_cf(&cf, &key, true).map_err(db_err)? {
        Some(data) => deserialize::<QuotaRecord>(&data)?,
        None => QuotaRecord::new(user_id.clone(), now),
    };

    let decision = record.try_consume(limit, now);
    if decision.allowed {
        txn.put_cf(&cf, &key, serialize(&record)?).map_err(db_err)?;
        txn.commit().map_err(db_err)?;
    }

    Ok(decision)
}

fn reset_quota_txn(db: &Db, user_id: &UserId) -> Result<QuotaRecord> {
    let cf = cf_handle(db, cf::QUOTAS)?;
    let key = keys::quota_key(user_id);
    let now = Utc::now();

    let txn = db.transaction();
    let mut record = match txn.get_for_update_cf(&cf, &key, true).map_err(db_err)? {
        Some(data) => deserialize::<QuotaRecord>(&data)?,
        None => QuotaRecord::new(user_id.clone(), now),
    };
    record.reset(now);

    txn.put_cf(&cf, &key, serialize(&record)?).map_err(db_err)?;
    txn.commit().map_err(db_err)?;

    Ok(record)
}

fn merge_subscription_txn(db: &Db, event: &BillingEvent) -> Result<ApplyOutcome> {
    let cf_subs = cf_handle(db, cf::SUBSCRIPTIONS)?;
    let cf_by_customer = cf_handle(db, cf::SUBSCRIPTIONS_BY_CUSTOMER)?;
    let cf_by_billing_id = cf_handle(db, cf::SUBSCRIPTIONS_BY_BILLING_ID)?;
    let key = keys::subscription_key(&event.user_id);

    let txn = db.transaction();
    let existing = txn
        .get_for_update_cf(&cf_subs, &key, true)
        .map_err(db_err)?
        .map(|data| deserialize::<SubscriptionRecord>(&data))
        .transpose()?;

    let (change, reason) = match reconcile(existing.as_ref(), event) {
        Reconciliation::Skip(reason) => return Ok(ApplyOutcome::rejected(reason)),
        Reconciliation::Write { change, reason } => (change, reason),
    };

    // Index locks are always taken customer first, then subscription.
    if let Some(customer) = change.claimed_customer() {
        let index_key = keys::customer_index_key(customer);
        let owner = txn
            .get_for_update_cf(&cf_by_customer, &index_key, true)
            .map_err(db_err)?
            .map(|data| keys::decode_owner(&data))
            .transpose()?;
        if let Some(conflict) =
            foreign_owner(owner, &event.user_id, IdentityField::Customer, customer.as_str())
        {
            return Ok(ApplyOutcome::rejected(ApplyReason::IdentityConflict(conflict)));
        }
        txn.put_cf(&cf_by_customer, &index_key, event.user_id.as_bytes())
            .map_err(db_err)?;
    }

    if let Some(subscription) = change.claimed_subscription() {
        let index_key = keys::billing_subscription_index_key(subscription);
        let owner = txn
            .get_for_update_cf(&cf_by_billing_id, &index_key, true)
            .map_err(db_err)?
            .map(|data| keys::decode_owner(&data))
            .transpose()?;
        if let Some(conflict) = foreign_owner(
            owner,
            &event.user_id,
            IdentityField::Subscription,
            subscription.as_str(),
        ) {
            return Ok(ApplyOutcome::rejected(ApplyReason::IdentityConflict(conflict)));
        }
        txn.put_cf(&cf_by_billing_id, &index_key, event.user_id.as_bytes())
            .map_err(db_err)?;
    }

    let record = change.into_record(existing.as_ref(), Utc::now());
    txn.put_cf(&cf_subs, &key, serialize(&record)?)
        .map_err(db_err)?;
    txn.commit().map_err(db_err)?;

    Ok(ApplyOutcome::applied(reason))
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Quota Operations
    // =========================================================================

    async fn consume_quota(&self, user_id: &UserId, limit: QuotaLimit) -> Result<QuotaDecision> {
        let user_id = user_id.clone();
        self.blocking(move |db| consume_quota_txn(db, &user_id, limit))
            .await
    }

    async fn reset_quota(&self, user_id: &UserId) -> Result<QuotaRecord> {
        let user_id = user_id.clone();
        self.blocking(move |db| reset_quota_txn(db, &user_id)).await
    }

    async fn get_quota(&self, user_id: &UserId) -> Result<Option<QuotaRecord>> {
        let key = keys::quota_key(user_id);
        self.blocking(move |db| {
            let cf = cf_handle(db, cf::QUOTAS)?;
            db.get_cf(&cf, key)
                .map_err(db_err)?
                .map(|data| deserialize(&data))
                .transpose()
        })
        .await
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn merge_subscription(&self, event: &BillingEvent) -> Result<ApplyOutcome> {
        let event = event.clone();
        self.blocking(move |db| merge_subscription_txn(db, &event))
            .await
    }

    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        let key = keys::subscription_key(user_id);
        self.blocking(move |db| {
            let cf = cf_handle(db, cf::SUBSCRIPTIONS)?;
            db.get_cf(&cf, key)
                .map_err(db_err)?
                .map(|data| deserialize(&data))
                .transpose()
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.blocking(|db| cf_handle(db, cf::QUOTAS).map(|_| ()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use chrono::Duration as ChronoDuration;
    use meter_core::{BillingCustomerId, BillingSubscriptionId, EventSequence};
    use tempfile::TempDir;

    fn create_test_store() -> (Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (Arc::new(store), dir)
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn event(user_id: &str, customer: &str, seq: i64, days: i64) -> BillingEvent {
        BillingEvent {
            user_id: user(user_id),
            billing_customer_id: BillingCustomerId::new(customer).unwrap(),
            billing_subscription_id: BillingSubscriptionId::new(format!("sub_{customer}"))
                .unwrap(),
            plan_id: Some("pro".into()),
            current_period_end: Some(Utc::now() + ChronoDuration::days(days)),
            event_sequence: EventSequence(seq),
        }
    }

    #[tokio::test]
    async fn quota_lifecycle() {
        let (store, _dir) = create_test_store();
        let u = user("u1");
        let limit = QuotaLimit::new(2).unwrap();

        let first = store.consume_quota(&u, limit).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining_before_call, 2);

        assert!(store.consume_quota(&u, limit).await.unwrap().allowed);

        let denied = store.consume_quota(&u, limit).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 2);

        let record = store.get_quota(&u).await.unwrap().unwrap();
        assert_eq!(record.count, 2);
        assert!(record.updated_at >= record.created_at);

        store.reset_quota(&u).await.unwrap();
        assert!(store.consume_quota(&u, limit).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumes_admit_exactly_limit() {
        let (store, _dir) = create_test_store();
        let limit = QuotaLimit::new(10).unwrap();

        let calls = (0..40).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let u = user("hot");
                store.consume_quota(&u, limit).await
            })
        });
        let admitted = futures::future::join_all(calls)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().as_ref().unwrap().allowed)
            .count();

        assert_eq!(admitted, 10);
        let record = store.get_quota(&user("hot")).await.unwrap().unwrap();
        assert_eq!(record.count, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reset_interleaved_with_consume() {
        let (store, _dir) = create_test_store();
        conformance::reset_interleaved_with_consume(store, "rocks").await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_keep_newest() {
        let (store, _dir) = create_test_store();
        conformance::concurrent_merges_keep_newest(store, "rocks").await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_users_single_owner() {
        let (store, _dir) = create_test_store();
        conformance::racing_users_single_owner(store, "rocks").await;
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store
                .consume_quota(&user("u1"), QuotaLimit::new(5).unwrap())
                .await
                .unwrap();
            store
                .merge_subscription(&event("u1", "C1", 1, 30))
                .await
                .unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_quota(&user("u1")).await.unwrap().unwrap().count, 1);
        let sub = store.get_subscription(&user("u1")).await.unwrap().unwrap();
        assert_eq!(sub.plan_id.as_deref(), Some("pro"));
    }

    #[tokio::test]
    async fn replay_and_out_of_order_events() {
        let (store, _dir) = create_test_store();
        let e1 = event("u1", "C1", 10, 30);
        let e2 = event("u1", "C1", 5, 60);

        assert!(store.merge_subscription(&e1).await.unwrap().applied);
        assert!(store.merge_subscription(&e1).await.unwrap().is_stale());
        assert!(store.merge_subscription(&e2).await.unwrap().is_stale());

        let record = store.get_subscription(&user("u1")).await.unwrap().unwrap();
        assert_eq!(record.current_period_end, e1.current_period_end);
        assert_eq!(record.event_sequence, EventSequence(10));
    }

    #[tokio::test]
    async fn shared_billing_identity_is_rejected() {
        let (store, _dir) = create_test_store();
        assert!(store
            .merge_subscription(&event("u1", "C1", 1, 30))
            .await
            .unwrap()
            .applied);

        let outcome = store
            .merge_subscription(&event("u2", "C1", 2, 30))
            .await
            .unwrap();
        match outcome.reason {
            ApplyReason::IdentityConflict(conflict) => {
                assert_eq!(conflict.field, IdentityField::Customer);
                assert_eq!(conflict.owner, user("u1"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(store.get_subscription(&user("u2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_subscription_id_is_rejected_without_claiming_customer() {
        let (store, _dir) = create_test_store();
        store
            .merge_subscription(&event("u1", "C1", 1, 30))
            .await
            .unwrap();

        let mut ev = event("u2", "C2", 1, 30);
        ev.billing_subscription_id = BillingSubscriptionId::new("sub_C1").unwrap();
        let outcome = store.merge_subscription(&ev).await.unwrap();
        assert!(outcome.is_identity_conflict());

        // C2 was not claimed by the rejected event.
        let retry = event("u3", "C2", 1, 30);
        assert!(store.merge_subscription(&retry).await.unwrap().applied);
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_store() {
        let (store, _dir) = create_test_store();
        store.ping().await.unwrap();
    }
}
