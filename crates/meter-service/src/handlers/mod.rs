//! HTTP request handlers.

pub mod billing;
pub mod health;
pub mod quota;

use axum::extract::rejection::JsonRejection;

use meter_core::UserId;

use crate::error::ApiError;

/// Parse a user id from a path segment or body field.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse::<UserId>()
        .map_err(|e| ApiError::BadRequest(format!("invalid user_id: {e}")))
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
