//! Liveness/readiness probes (spec.md 6). `/health` is liveness-only and
//! always 200; `/ready` reflects whether storage and every broker session
//! are healthy (spec.md 7 "Degraded state is reported via /ready").

use super::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

pub async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    metadata_ok: bool,
    timeseries_ok: bool,
    brokers_healthy: bool,
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyBody>) {
    let store_health = state.storage.health();
    let brokers_healthy = state.brokers.is_healthy();
    let healthy = store_health.is_healthy() && brokers_healthy;
    let body = ReadyBody {
        status: if healthy { "ok" } else { "degraded" },
        metadata_ok: store_health.metadata_ok,
        timeseries_ok: store_health.timeseries_ok,
        brokers_healthy,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
