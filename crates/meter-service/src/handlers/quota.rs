//! Quota handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meter_core::{QuotaLimit, UserId};

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::handlers::parse_user_id;
use crate::state::AppState;

/// Request to admit one metered call.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// The calling user.
    pub user_id: String,
    /// Ceiling resolved by the caller; the configured free-tier limit when absent.
    pub limit: Option<u64>,
}

/// Admission decision.
#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Calls left before this one was counted.
    pub remaining_before_call: u64,
    /// Counter value after the decision.
    pub count: u64,
    /// The limit that was applied.
    pub limit: u64,
}

/// Optional limit override for usage lookups.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    /// Limit to compute `remaining` against.
    pub limit: Option<u64>,
}

/// A user's counter as seen by callers.
#[derive(Debug, Serialize)]
pub struct QuotaUsageResponse {
    /// The user.
    pub user_id: UserId,
    /// Calls recorded since the last reset.
    pub count: u64,
    /// The limit `remaining` is computed against.
    pub limit: u64,
    /// Calls left under `limit`.
    pub remaining: u64,
    /// Last mutation, absent when the user has never been counted.
    pub updated_at: Option<DateTime<Utc>>,
}

fn resolve_limit(state: &AppState, requested: Option<u64>) -> Result<QuotaLimit, ApiError> {
    Ok(QuotaLimit::new(
        requested.unwrap_or(state.config.free_tier_limit),
    )?)
}

/// Admit and record one call.
///
/// Limit reached is a 200 with `allowed = false`; a store failure is a 503 and
/// the caller must deny.
pub async fn consume(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Result<Json<ConsumeRequest>, JsonRejection>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let Json(request) = body?;
    let user_id = parse_user_id(&request.user_id)?;
    let limit = resolve_limit(&state, request.limit)?;

    tracing::debug!(
        service = %auth.service_name,
        user_id = %user_id,
        limit = limit.get(),
        "Quota consume requested"
    );

    let decision = state.ledger.try_consume(&user_id, limit).await?;

    Ok(Json(ConsumeResponse {
        allowed: decision.allowed,
        remaining_before_call: decision.remaining_before_call,
        count: decision.count,
        limit: limit.get(),
    }))
}

/// Current counter for a user; a zeroed view when none exists.
pub async fn usage(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<QuotaUsageResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let limit = resolve_limit(&state, query.limit)?;

    let record = state.ledger.usage(&user_id).await?;
    let (count, updated_at) = record
        .as_ref()
        .map_or((0, None), |r| (r.count, Some(r.updated_at)));

    Ok(Json(QuotaUsageResponse {
        user_id,
        count,
        limit: limit.get(),
        remaining: limit.get().saturating_sub(count),
        updated_at,
    }))
}

/// Zero a user's counter (admin only).
pub async fn reset(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<QuotaUsageResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let limit = resolve_limit(&state, None)?;

    tracing::info!(admin_id = %auth.admin_id, user_id = %user_id, "Quota reset requested");

    let record = state.ledger.reset(&user_id).await?;

    Ok(Json(QuotaUsageResponse {
        user_id,
        count: record.count,
        limit: limit.get(),
        remaining: record.remaining(limit),
        updated_at: Some(record.updated_at),
    }))
}
