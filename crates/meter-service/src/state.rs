//! Application state.

use std::sync::Arc;

use meter_store::Store;

use crate::config::ServiceConfig;
use crate::quota::QuotaLedger;
use crate::reconciler::SubscriptionReconciler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Free-tier call counter.
    pub ledger: QuotaLedger,

    /// Billing event merger.
    pub reconciler: SubscriptionReconciler,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not configured - quota and billing endpoints will reject all requests");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not configured - quota resets are disabled");
        }

        let ledger = QuotaLedger::new(store.clone(), config.store_timeout);
        let reconciler = SubscriptionReconciler::new(store.clone(), config.store_timeout);

        Self {
            store,
            config,
            ledger,
            reconciler,
        }
    }
}
