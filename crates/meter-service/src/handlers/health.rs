//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::deadline::bounded;
use crate::error::ApiError;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
}

/// Health check endpoint. Returns 503 when the store cannot be reached.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    bounded(state.config.store_timeout, state.store.ping())
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Health check failed");
            ApiError::from(e)
        })?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        service: "meter".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
