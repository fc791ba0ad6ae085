//! Instrument CRUD (spec.md 6), a thin mapping onto C7.

use super::{ApiResponse, AppState};
use crate::error::AppResult;
use crate::models::{Instrument, InstrumentUpdate, NewInstrumentRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub async fn list(State(state): State<AppState>) -> Json<ApiResponse<Vec<Instrument>>> {
    ApiResponse::ok(state.subscriptions.list_instruments())
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<NewInstrumentRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Instrument>>)> {
    let instrument = state.subscriptions.add_instrument(req)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(instrument)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> AppResult<Json<ApiResponse<Instrument>>> {
    state
        .subscriptions
        .get_instrument(&symbol)
        .map(ApiResponse::ok)
        .ok_or_else(|| crate::error::AppError::NotFound(format!("instrument {symbol}")))
}

pub async fn update(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(update): Json<InstrumentUpdate>,
) -> AppResult<Json<ApiResponse<Instrument>>> {
    let instrument = state.subscriptions.update_instrument(&symbol, update)?;
    Ok(ApiResponse::ok(instrument))
}

/// Stubbed per spec.md 6/9: the authoritative cascade-vs-refuse policy for
/// deleting an instrument through HTTP is an open question. The underlying
/// capability exists at `SubscriptionRegistry::delete_instrument`.
pub async fn delete(State(_state): State<AppState>, Path(_symbol): Path<String>) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "success": false,
            "error": {
                "code": "not_implemented",
                "message": "instrument deletion policy (cascade vs refuse) is undefined"
            }
        })),
    )
        .into_response()
}
