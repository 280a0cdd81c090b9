//! HTTP routes configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{billing, health, quota};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check (pings the store)
///
/// ## Quota (Service API Key auth)
/// - `POST /v1/quota/consume` - Admit and record one call
/// - `GET /v1/quota/:user_id` - Current counter
///
/// ## Quota (Admin key auth)
/// - `POST /v1/quota/:user_id/reset` - Zero the counter
///
/// ## Billing (Service API Key auth)
/// - `POST /v1/billing/events` - Merge a normalized billing event
/// - `GET /v1/subscriptions/:user_id` - Subscription and derived state
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Quota
        .route("/v1/quota/consume", post(quota::consume))
        .route("/v1/quota/:user_id", get(quota::usage))
        .route("/v1/quota/:user_id/reset", post(quota::reset))
        // Billing
        .route("/v1/billing/events", post(billing::apply_event))
        .route("/v1/subscriptions/:user_id", get(billing::subscription))
        // Middleware, outermost first
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(Duration::from_secs(
                    request_timeout_seconds,
                )))
                .layer(MapResponseBodyLayer::new(axum::body::Body::new))
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
