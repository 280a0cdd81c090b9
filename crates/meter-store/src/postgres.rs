//! `PostgreSQL` storage implementation.
//!
//! This is the backend for replicated deployments: every guarantee is held by
//! the database, not by the process.
//!
//! - Quota consumption is one conditional upsert
//!   (`INSERT .. ON CONFLICT .. DO UPDATE .. WHERE count < limit`), so the
//!   check and the increment are a single statement.
//! - Subscription merges run in a transaction that first takes a
//!   transaction-scoped advisory lock keyed by the user, then evaluates
//!   [`meter_core::reconcile`] against the row. Unique constraints on the
//!   billing identifiers back up the ownership check.
//! - `created_at`/`updated_at` come from the database clock (`now()`).

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use meter_core::{
    reconcile, ApplyOutcome, ApplyReason, BillingCustomerId, BillingEvent,
    BillingSubscriptionId, EventSequence, IdentityConflict, IdentityField, QuotaDecision,
    QuotaLimit, QuotaRecord, Reconciliation, SubscriptionChange, SubscriptionRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::{foreign_owner, Store};

/// Advisory lock namespace for per-user subscription merges.
const SUBSCRIPTION_LOCK_NAMESPACE: i32 = 0x5355_4253; // "SUBS"

const CUSTOMER_UNIQUE: &str = "subscriptions_billing_customer_id_key";
const BILLING_SUBSCRIPTION_UNIQUE: &str = "subscriptions_billing_subscription_id_key";

const CONSUME_SQL: &str = r"
    INSERT INTO quota_usage (user_id, count)
    VALUES ($1, 1)
    ON CONFLICT (user_id) DO UPDATE
        SET count = quota_usage.count + 1,
            updated_at = now()
        WHERE quota_usage.count < $2
    RETURNING quota_usage.count
";

const RESET_SQL: &str = r"
    INSERT INTO quota_usage (user_id, count)
    VALUES ($1, 0)
    ON CONFLICT (user_id) DO UPDATE
        SET count = 0,
            updated_at = now()
    RETURNING user_id, count, created_at, updated_at
";

const UPSERT_SUBSCRIPTION_SQL: &str = r"
    INSERT INTO subscriptions (
        user_id, billing_customer_id, billing_subscription_id,
        plan_id, current_period_end, event_sequence
    )
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (user_id) DO UPDATE
        SET billing_customer_id = EXCLUDED.billing_customer_id,
            billing_subscription_id = EXCLUDED.billing_subscription_id,
            plan_id = EXCLUDED.plan_id,
            current_period_end = EXCLUDED.current_period_end,
            event_sequence = EXCLUDED.event_sequence,
            updated_at = now()
";

const SELECT_SUBSCRIPTION_SQL: &str = r"
    SELECT user_id, billing_customer_id, billing_subscription_id, plan_id,
           current_period_end, event_sequence, created_at, updated_at
    FROM subscriptions
    WHERE user_id = $1
";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `PostgreSQL` and apply pending migrations.
    ///
    /// `statement_timeout` is applied server-side to every statement so a
    /// stuck query surfaces as an error instead of hanging the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the database is unreachable, or
    /// a migration fails.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        statement_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut opts = PgConnectOptions::from_str(url)?;
        if let Some(timeout) = statement_timeout {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout.as_millis()))]);
        }

        let mut pool_opts = PgPoolOptions::new().max_connections(max_connections);
        if let Some(timeout) = statement_timeout {
            pool_opts = pool_opts.acquire_timeout(timeout);
        }
        let pool = pool_opts.connect_with(opts).await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Migrations are not applied.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up the user currently holding a billing identifier.
    async fn owner_of<'e, E>(executor: E, field: IdentityField, id: &str) -> Result<Option<UserId>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = match field {
            IdentityField::Customer => {
                "SELECT user_id FROM subscriptions WHERE billing_customer_id = $1"
            }
            IdentityField::Subscription => {
                "SELECT user_id FROM subscriptions WHERE billing_subscription_id = $1"
            }
        };
        let owner: Option<String> = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(executor)
            .await?;
        owner.map(parse_user_id).transpose()
    }

    /// Write a reconciled change inside the locked transaction.
    ///
    /// Returns `Ok(None)` on success and `Ok(Some(field))` when a unique
    /// billing identifier constraint rejected the write.
    async fn write_change(
        tx: &mut Transaction<'_, Postgres>,
        change: &SubscriptionChange,
    ) -> Result<Option<IdentityField>> {
        let result = sqlx::query(UPSERT_SUBSCRIPTION_SQL)
            .bind(change.user_id.as_str())
            .bind(change.billing_customer_id.as_str())
            .bind(change.billing_subscription_id.as_str())
            .bind(change.plan_id.as_deref())
            .bind(change.current_period_end)
            .bind(change.event_sequence.get())
            .execute(&mut **tx)
            .await;

        match result {
            Ok(_) => Ok(None),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                match db_err.constraint() {
                    Some(CUSTOMER_UNIQUE) => Ok(Some(IdentityField::Customer)),
                    Some(BILLING_SUBSCRIPTION_UNIQUE) => Ok(Some(IdentityField::Subscription)),
                    _ => Err(sqlx::Error::Database(db_err).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    user_id: String,
    count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QuotaRow> for QuotaRecord {
    type Error = StoreError;

    fn try_from(row: QuotaRow) -> Result<Self> {
        Ok(Self {
            user_id: parse_user_id(row.user_id)?,
            count: to_count(row.count)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    user_id: String,
    billing_customer_id: Option<String>,
    billing_subscription_id: Option<String>,
    plan_id: Option<String>,
    current_period_end: Option<DateTime<Utc>>,
    event_sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        let corrupt = |e: meter_core::IdError| StoreError::Serialization(e.to_string());
        Ok(Self {
            user_id: parse_user_id(row.user_id)?,
            billing_customer_id: row
                .billing_customer_id
                .map(BillingCustomerId::new)
                .transpose()
                .map_err(corrupt)?,
            billing_subscription_id: row
                .billing_subscription_id
                .map(BillingSubscriptionId::new)
                .transpose()
                .map_err(corrupt)?,
            plan_id: row.plan_id,
            current_period_end: row.current_period_end,
            event_sequence: EventSequence(row.event_sequence),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_user_id(raw: String) -> Result<UserId> {
    UserId::new(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_count(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| StoreError::Serialization(format!("negative count: {raw}")))
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Quota Operations
    // =========================================================================

    async fn consume_quota(&self, user_id: &UserId, limit: QuotaLimit) -> Result<QuotaDecision> {
        let bound = i64::try_from(limit.get()).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;
        let admitted: Option<i64> = sqlx::query_scalar(CONSUME_SQL)
            .bind(user_id.as_str())
            .bind(bound)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(count_after) = admitted {
            tx.commit().await?;
            return Ok(QuotaDecision::admitted(to_count(count_after)? - 1, limit));
        }

        // A skipped ON CONFLICT update still locks the conflicting row until
        // commit, so this read sees the count the guard was evaluated against.
        let count: Option<i64> =
            sqlx::query_scalar("SELECT count FROM quota_usage WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(QuotaDecision::denied(to_count(count.unwrap_or(0))?, limit))
    }

    async fn reset_quota(&self, user_id: &UserId) -> Result<QuotaRecord> {
        let row: QuotaRow = sqlx::query_as(RESET_SQL)
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_quota(&self, user_id: &UserId) -> Result<Option<QuotaRecord>> {
        let row: Option<QuotaRow> = sqlx::query_as(
            "SELECT user_id, count, created_at, updated_at FROM quota_usage WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    async fn merge_subscription(&self, event: &BillingEvent) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(SUBSCRIPTION_LOCK_NAMESPACE)
            .bind(event.user_id.as_str())
            .execute(&mut *tx)
            .await?;

        let existing: Option<SubscriptionRecord> = sqlx::query_as::<_, SubscriptionRow>(
            SELECT_SUBSCRIPTION_SQL,
        )
        .bind(event.user_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(TryInto::try_into)
        .transpose()?;

        let (change, reason) = match reconcile(existing.as_ref(), event) {
            Reconciliation::Skip(reason) => {
                tx.rollback().await?;
                return Ok(ApplyOutcome::rejected(reason));
            }
            Reconciliation::Write { change, reason } => (change, reason),
        };

        let claims = [
            change
                .claimed_customer()
                .map(|id| (IdentityField::Customer, id.as_str())),
            change
                .claimed_subscription()
                .map(|id| (IdentityField::Subscription, id.as_str())),
        ];
        for (field, id) in claims.into_iter().flatten() {
            let owner = Self::owner_of(&mut *tx, field, id).await?;
            if let Some(conflict) = foreign_owner(owner, &event.user_id, field, id) {
                tx.rollback().await?;
                return Ok(ApplyOutcome::rejected(ApplyReason::IdentityConflict(conflict)));
            }
        }

        if let Some(field) = Self::write_change(&mut tx, &change).await? {
            // Lost a race with another user's merge claiming the same identifier.
            tx.rollback().await?;
            let id = match field {
                IdentityField::Customer => change.claimed_customer().map(BillingCustomerId::as_str),
                IdentityField::Subscription => change
                    .claimed_subscription()
                    .map(BillingSubscriptionId::as_str),
            }
            .unwrap_or_default();
            return match Self::owner_of(&self.pool, field, id).await? {
                Some(owner) => Ok(ApplyOutcome::rejected(ApplyReason::IdentityConflict(
                    IdentityConflict::shared(field, owner, id),
                ))),
                None => Err(StoreError::Unavailable(format!(
                    "unique violation on {field} without a visible owner"
                ))),
            };
        }

        tx.commit().await?;
        Ok(ApplyOutcome::applied(reason))
    }

    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(SELECT_SUBSCRIPTION_SQL)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    // =========================================================================
    // Health
    // =========================================================================

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
