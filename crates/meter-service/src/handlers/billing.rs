//! Billing event intake and subscription lookup.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;

use meter_core::{ApplyOutcome, ApplyReason, BillingEvent};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::parse_user_id;
use crate::reconciler::SubscriptionStatus;
use crate::state::AppState;

/// Merge one normalized billing event.
///
/// Stale replays return 200 with `applied = false`. Identity conflicts return
/// 409 with the conflict as details. Store failures return 503 and the event
/// should be redelivered.
pub async fn apply_event(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Result<Json<BillingEvent>, JsonRejection>,
) -> Result<Json<ApplyOutcome>, ApiError> {
    let Json(event) = body?;

    tracing::debug!(
        service = %auth.service_name,
        user_id = %event.user_id,
        event_sequence = %event.event_sequence,
        "Billing event received"
    );

    let outcome = state.reconciler.apply_event(&event).await?;

    match outcome {
        ApplyOutcome {
            reason: ApplyReason::IdentityConflict(conflict),
            ..
        } => Err(ApiError::IdentityConflict(conflict)),
        outcome => Ok(Json(outcome)),
    }
}

/// The user's subscription and its state evaluated now.
pub async fn subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<SubscriptionStatus>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let status = state.reconciler.status(&user_id, Utc::now()).await?;
    Ok(Json(status))
}
