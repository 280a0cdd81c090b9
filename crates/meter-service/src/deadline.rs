//! Store call deadlines.

use std::future::Future;
use std::time::Duration;

use meter_store::StoreError;

/// Run a store call, converting an elapsed deadline into `StoreError::Timeout`.
///
/// A timeout reports failure but does not always cancel the write. A dropped
/// `PostgreSQL` transaction rolls back unless its commit was already sent. The
/// `RocksDB` backend runs on a blocking thread that finishes on its own, so
/// the write may still land after the caller was told it failed; its row lock
/// wait is capped at [`ServiceConfig::rocks_lock_timeout`] to keep that window
/// short. Either way the operation is all or nothing.
///
/// [`ServiceConfig::rocks_lock_timeout`]: crate::config::ServiceConfig::rocks_lock_timeout
pub(crate) async fn bounded<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or_else(|_| {
            Err(StoreError::Timeout {
                millis: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })
        })
}
