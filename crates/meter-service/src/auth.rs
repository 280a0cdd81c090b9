//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `ServiceAuth` - Service-to-service authentication via `X-API-Key`
//! - `AdminAuth` - Admin authentication for privileged endpoints via `X-Admin-Key`
//!
//! Both reject when the corresponding key is not configured.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::crypto::api_key_matches;
use crate::error::ApiError;
use crate::state::AppState;

/// Service authentication via API key.
///
/// Used by request-handling services asking for quota decisions and by the
/// billing intake layer.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The service name or identifier.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_key(
            parts,
            "x-api-key",
            state.config.service_api_key.as_deref(),
        )?;

        let service_name = parts
            .headers
            .get("x-service-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Ok(ServiceAuth { service_name })
    }
}

/// Admin authentication via a separate admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_key(parts, "x-admin-key", state.config.admin_api_key.as_deref())?;

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("admin")
            .to_string();

        Ok(AdminAuth { admin_id })
    }
}

fn check_key(parts: &Parts, header: &str, expected: Option<&str>) -> Result<(), ApiError> {
    let presented = parts
        .headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let expected = expected.ok_or(ApiError::Unauthorized)?;

    if api_key_matches(presented, expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
