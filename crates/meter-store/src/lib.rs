//! Storage layer for meter.
//!
//! This crate persists quota counters and subscription snapshots behind the
//! [`Store`] trait. Each operation is a single atomic read-modify-write scoped
//! to one user's row; concurrent calls for different users do not contend.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, for tests and single-instance development.
//! - [`RocksStore`]: embedded `RocksDB` with pessimistic row transactions
//!   (feature `rocksdb-backend`, on by default).
//! - [`PgStore`]: `PostgreSQL`, safe for many replicas sharing one database.
//!
//! Every backend evaluates the admission and merge rules from `meter-core`, so
//! they agree on semantics and differ only in how they make the rule atomic.
//!
//! # Example
//!
//! ```no_run
//! use meter_core::{QuotaLimit, UserId};
//! use meter_store::{MemoryStore, Store};
//!
//! # async fn example() -> meter_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::new("user_1").unwrap();
//! let decision = store.consume_quota(&user_id, QuotaLimit::new(100).unwrap()).await?;
//! assert!(decision.allowed);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

#[cfg(test)]
mod conformance;
pub mod error;
pub mod memory;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use meter_core::{
    ApplyOutcome, BillingEvent, QuotaDecision, QuotaLimit, QuotaRecord, SubscriptionRecord,
    UserId,
};

/// The storage trait defining all database operations.
///
/// Implementations must make each mutating method atomic with respect to every
/// other call for the same user, including calls from other processes sharing
/// the same backing store, and must assign `created_at`/`updated_at`
/// themselves.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Quota Operations
    // =========================================================================

    /// Admit and record one call if the user's counter is below `limit`.
    ///
    /// Creates the counter on first use. A denied call does not mutate.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be consulted; no increment is
    /// visible in that case.
    async fn consume_quota(&self, user_id: &UserId, limit: QuotaLimit) -> Result<QuotaDecision>;

    /// Set the user's counter to zero, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be consulted.
    async fn reset_quota(&self, user_id: &UserId) -> Result<QuotaRecord>;

    /// Get the user's counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_quota(&self, user_id: &UserId) -> Result<Option<QuotaRecord>>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Merge a billing event into the user's subscription record.
    ///
    /// Stale events and identity conflicts are reported in the outcome and
    /// leave the record untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be consulted; the record is left
    /// untouched and the event can be retried.
    async fn merge_subscription(&self, event: &BillingEvent) -> Result<ApplyOutcome>;

    /// Get the user's subscription record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if it is not.
    async fn ping(&self) -> Result<()>;
}

/// Conflict for an identifier recorded under an owner other than `user_id`.
pub(crate) fn foreign_owner(
    owner: Option<UserId>,
    user_id: &UserId,
    field: meter_core::IdentityField,
    id: &str,
) -> Option<meter_core::IdentityConflict> {
    owner
        .filter(|owner| owner != user_id)
        .map(|owner| meter_core::IdentityConflict::shared(field, owner, id))
}
