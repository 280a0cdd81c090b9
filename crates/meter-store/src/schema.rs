//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage. The
//! `PostgreSQL` schema lives in `migrations/`.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Quota counters, keyed by `user_id`.
    pub const QUOTAS: &str = "quotas";

    /// Subscription records, keyed by `user_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Unique index: `billing_customer_id` to owning `user_id`.
    pub const SUBSCRIPTIONS_BY_CUSTOMER: &str = "subscriptions_by_customer";

    /// Unique index: `billing_subscription_id` to owning `user_id`.
    pub const SUBSCRIPTIONS_BY_BILLING_ID: &str = "subscriptions_by_billing_id";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::QUOTAS,
        cf::SUBSCRIPTIONS,
        cf::SUBSCRIPTIONS_BY_CUSTOMER,
        cf::SUBSCRIPTIONS_BY_BILLING_ID,
    ]
}
