//! Time-series reads (spec.md 6), mapping query strings onto C8's
//! `DataQuery`.

use super::{ApiResponse, AppState};
use crate::error::{AppError, AppResult};
use crate::models::{Candle, OrderBook, Ticker, Timeframe};
use crate::query::DataQuery;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;
const DEFAULT_DEPTH: usize = 20;
const MAX_DEPTH: usize = 100;

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    symbol: String,
    broker_id: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

pub async fn tickers(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> AppResult<Json<ApiResponse<Vec<Ticker>>>> {
    let query = DataQuery {
        symbols: vec![params.symbol],
        broker_ids: params.broker_id.into_iter().collect(),
        start_time: params.from,
        end_time: params.to,
        timeframe: None,
        limit: clamp_limit(params.limit),
    };
    let rows = state.query.tickers(&query)?;
    Ok(ApiResponse::ok(rows))
}

#[derive(Debug, Deserialize)]
pub struct CandleParams {
    symbol: String,
    broker_id: Option<String>,
    timeframe: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

pub async fn candles(
    State(state): State<AppState>,
    Query(params): Query<CandleParams>,
) -> AppResult<Json<ApiResponse<Vec<Candle>>>> {
    let timeframe_str = params.timeframe.as_deref().unwrap_or("1m");
    let timeframe = Timeframe::parse(timeframe_str)
        .ok_or_else(|| AppError::Validation(format!("unknown timeframe '{timeframe_str}'")))?;
    let query = DataQuery {
        symbols: vec![params.symbol],
        broker_ids: params.broker_id.into_iter().collect(),
        start_time: params.from,
        end_time: params.to,
        timeframe: Some(timeframe),
        limit: clamp_limit(params.limit),
    };
    let rows = state.query.candles(&query)?;
    Ok(ApiResponse::ok(rows))
}

#[derive(Debug, Deserialize)]
pub struct OrderBookParams {
    symbol: String,
    broker_id: Option<String>,
    depth: Option<usize>,
}

pub async fn orderbooks(
    State(state): State<AppState>,
    Query(params): Query<OrderBookParams>,
) -> AppResult<Json<ApiResponse<OrderBook>>> {
    let depth = params.depth.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH);
    state
        .query
        .latest_orderbook(&params.symbol, params.broker_id.as_deref(), depth)?
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::NotFound(format!("no order book for {}", params.symbol)))
}
