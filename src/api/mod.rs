//! HTTP surface (spec.md 6). Out of the core C1-C10 component set (spec.md
//! 1 lists "the HTTP handler layer (CRUD mapping)" as an external
//! collaborator) but required to run the service end to end; handlers are
//! thin CRUD/query mappings over C7/C8, matching the teacher's
//! `routes.rs` handler style (extractors in, `AppResult<Json<_>>` out).

pub mod data;
pub mod health;
pub mod instruments;
pub mod subscriptions;

use crate::broker::BrokerManager;
use crate::container::Container;
use crate::query::QueryService;
use crate::storage::StorageManager;
use crate::subscriptions::SubscriptionRegistry;
use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub query: Arc<QueryService>,
    pub storage: Arc<StorageManager>,
    pub brokers: Arc<BrokerManager>,
}

impl AppState {
    pub fn from_container(container: &Container) -> Self {
        Self {
            subscriptions: container.subscriptions.clone(),
            query: container.query.clone(),
            storage: container.storage.clone(),
            brokers: container.brokers.clone(),
        }
    }
}

/// `{success, data}` envelope for every non-error response (spec.md 6); the
/// error counterpart lives in `error.rs`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> axum::Json<Self> {
        axum::Json(Self {
            success: true,
            data,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/instruments",
            get(instruments::list).post(instruments::create),
        )
        .route(
            "/instruments/:symbol",
            get(instruments::get)
                .put(instruments::update)
                .delete(instruments::delete),
        )
        .route(
            "/subscriptions",
            get(subscriptions::list).post(subscriptions::create),
        )
        .route(
            "/subscriptions/:id",
            get(subscriptions::get)
                .put(subscriptions::update)
                .delete(subscriptions::delete),
        )
        .route("/subscriptions/:id/start", post(subscriptions::start))
        .route("/subscriptions/:id/stop", post(subscriptions::stop))
        .route("/data/tickers", get(data::tickers))
        .route("/data/candles", get(data::candles))
        .route("/data/orderbooks", get(data::orderbooks));

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/api/v1", v1)
        .with_state(state)
}
