//! Data model (spec.md 3): instruments, subscriptions, broker configs, and
//! the three sample record variants.

mod instrument;
mod sample;
mod subscription;

pub use instrument::{
    Instrument, InstrumentKind, InstrumentUpdate, InstrumentValidationError, Market,
    NewInstrumentRequest,
};
pub use sample::{Candle, OrderBook, OrderBookLevel, SampleEnvelope, Ticker, Timeframe};
pub use subscription::{
    DataType, InstrumentSubscription, NewSubscriptionRequest, SubscriptionSettings,
    SubscriptionUpdate,
};

use serde::{Deserialize, Serialize};

/// Identity and connection parameters for one broker adapter instance.
/// Ownership of a `BrokerConfig` is exclusive to the session that connects
/// with it (spec.md 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub broker_id: String,
    pub adapter_kind: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_max_symbols_per_connection")]
    pub max_symbols_per_connection: usize,
    #[serde(default)]
    pub rate_limit_per_sec: Option<u32>,
}

fn default_max_symbols_per_connection() -> usize {
    200
}
