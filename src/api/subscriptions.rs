//! Subscription CRUD plus start/stop tracking (spec.md 6), a thin mapping
//! onto C7. `update` pre-checks the raw body for `start_date` because
//! `SubscriptionUpdate` has no such field and would otherwise silently drop
//! a client-supplied one instead of rejecting it (spec.md 4.6: `start_date`
//! is immutable once a subscription exists).

use super::{ApiResponse, AppState};
use crate::error::{AppError, AppResult};
use crate::models::{InstrumentSubscription, NewSubscriptionRequest, SubscriptionUpdate};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};

pub async fn list(State(state): State<AppState>) -> Json<ApiResponse<Vec<InstrumentSubscription>>> {
    ApiResponse::ok(state.subscriptions.list_subscriptions())
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<NewSubscriptionRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<InstrumentSubscription>>)> {
    let sub = state.subscriptions.add_subscription(req)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(sub)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<InstrumentSubscription>>> {
    state
        .subscriptions
        .get_subscription(&id)
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<ApiResponse<InstrumentSubscription>>> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))?;
    if value.get("start_date").is_some() {
        return Err(AppError::ImmutableField(
            "start_date cannot be changed after a subscription is created".to_string(),
        ));
    }
    let update: SubscriptionUpdate = serde_json::from_value(value)
        .map_err(|e| AppError::Validation(format!("invalid subscription update: {e}")))?;
    let sub = state.subscriptions.update_subscription(&id, update)?;
    Ok(ApiResponse::ok(sub))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<StatusCode> {
    state.subscriptions.remove_subscription(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<InstrumentSubscription>>> {
    state.subscriptions.start_tracking(&id)?;
    let sub = state
        .subscriptions
        .get_subscription(&id)
        .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
    Ok(ApiResponse::ok(sub))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<InstrumentSubscription>>> {
    state.subscriptions.stop_tracking(&id)?;
    let sub = state
        .subscriptions
        .get_subscription(&id)
        .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
    Ok(ApiResponse::ok(sub))
}
