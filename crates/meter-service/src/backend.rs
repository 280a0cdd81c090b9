//! Store backend selection.

use std::sync::Arc;

use meter_store::{MemoryStore, PgStore, Store, StoreError};

use crate::config::{ServiceConfig, StoreBackend};

/// Errors opening the configured store.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// `postgres` selected without a database URL.
    #[error("postgres backend selected but no DATABASE_URL or secrets file is configured")]
    MissingDatabaseUrl,

    /// The backend was not compiled into this binary.
    #[error("{0:?} backend is not compiled in (enable the rocksdb-backend feature)")]
    NotCompiled(StoreBackend),

    /// The store refused to open.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Open the store selected by `config`.
///
/// # Errors
///
/// Returns an error if the backend is misconfigured, not compiled in, or
/// cannot be opened.
pub async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, BackendError> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store - counters and subscriptions are not durable");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::RocksDb => open_rocks(config),
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(BackendError::MissingDatabaseUrl)?;
            tracing::info!(
                max_connections = config.database_max_connections,
                "Connecting to PostgreSQL store"
            );
            let store = PgStore::connect(
                url,
                config.database_max_connections,
                Some(config.store_timeout),
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocks(config: &ServiceConfig) -> Result<Arc<dyn Store>, BackendError> {
    let lock_timeout = config.rocks_lock_timeout();
    tracing::info!(
        path = %config.data_dir,
        lock_timeout = ?lock_timeout,
        "Opening RocksDB store"
    );
    let store = meter_store::RocksStore::open_with_lock_timeout(&config.data_dir, lock_timeout)?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocks(_config: &ServiceConfig) -> Result<Arc<dyn Store>, BackendError> {
    Err(BackendError::NotCompiled(StoreBackend::RocksDb))
}
