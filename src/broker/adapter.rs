//! C1 — Broker Adapter contract.
//!
//! The source expresses this as an interface with method set
//! `{Connect, Disconnect, Subscribe, Unsubscribe, Health, Streams}`
//! (spec.md 9). Reimplemented here as a trait object (a capability set)
//! rather than a class hierarchy: any adapter kind implements the same
//! narrow contract and is held behind `Box<dyn BrokerAdapter>`.

use crate::models::{Candle, DataType, OrderBook, Ticker};
use async_trait::async_trait;
use std::fmt;

/// One normalized record emitted by an adapter onto the session's stream.
#[derive(Debug, Clone)]
pub enum NormalizedRecord {
    Ticker(Ticker),
    Candle(Candle),
    OrderBook(OrderBook),
}

/// A target the adapter should stream: one `(symbol, data_type)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionTarget {
    pub symbol: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    ConnectFailed(String),
    Transient(String),
    RateLimited { retry_after_ms: u64 },
    ProtocolError(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(m) => write!(f, "connect failed: {m}"),
            Self::Transient(m) => write!(f, "transient error: {m}"),
            Self::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {retry_after_ms}ms")
            }
            Self::ProtocolError(m) => write!(f, "protocol error: {m}"),
        }
    }
}
impl std::error::Error for AdapterError {}

/// Declared adapter capabilities (C1): the per-connection symbol cap an
/// adapter advertises. This implementation runs one connection per
/// session and does not split an over-capacity subscription set across
/// multiple connections (see SPEC_FULL.md's resolved-behavior note);
/// `max_symbols_per_connection` is still surfaced here and in
/// `BrokerConfig` as operator-facing information.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    pub max_symbols_per_connection: usize,
}

/// Provider-specific wire protocol; emits normalized records on a channel
/// handed to `connect`.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Stable identifier for this adapter kind, e.g. `"binance"`, `"mock"`.
    fn kind(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Establish the connection/handshake. Records flow out via `tx` until
    /// `disconnect` is called or the channel is dropped.
    async fn connect(
        &self,
        tx: tokio::sync::mpsc::Sender<NormalizedRecord>,
    ) -> Result<(), AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    async fn subscribe(&self, targets: &[SubscriptionTarget]) -> Result<(), AdapterError>;

    async fn unsubscribe(&self, targets: &[SubscriptionTarget]) -> Result<(), AdapterError>;

    /// Send a heartbeat ping; `Ok(true)` if a pong was observed since the
    /// previous call.
    async fn ping(&self) -> Result<bool, AdapterError>;
}
