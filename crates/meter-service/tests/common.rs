//! Common test utilities for meter-service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_test::TestServer;

use meter_service::{create_router, AppState, ServiceConfig, StoreBackend};
use meter_store::MemoryStore;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, kept to simulate outages.
    pub store: Arc<MemoryStore>,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin key for privileged requests.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and a free-tier limit of 3.
    pub fn new() -> Self {
        Self::with_limit(3)
    }

    /// Create a harness with the given free-tier limit.
    pub fn with_limit(free_tier_limit: u64) -> Self {
        let store = Arc::new(MemoryStore::new());

        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            store_backend: StoreBackend::Memory,
            data_dir: String::new(),
            database_url: None,
            database_max_connections: 1,
            store_timeout: Duration::from_secs(2),
            free_tier_limit,
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            cors_origins: vec!["*".into()],
            max_body_bytes: 64 * 1024,
            request_timeout_seconds: 30,
        };

        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            service_api_key,
            admin_api_key,
        }
    }

    /// Consume one call for `user_id` with an explicit limit.
    pub async fn consume(&self, user_id: &str, limit: u64) -> serde_json::Value {
        let response = self
            .server
            .post("/v1/quota/consume")
            .add_header("x-api-key", &self.service_api_key)
            .json(&serde_json::json!({ "user_id": user_id, "limit": limit }))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Post a billing event and return the raw response.
    pub async fn post_event(&self, event: serde_json::Value) -> axum_test::TestResponse {
        self.server
            .post("/v1/billing/events")
            .add_header("x-api-key", &self.service_api_key)
            .json(&event)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
