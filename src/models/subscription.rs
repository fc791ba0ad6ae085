use super::{InstrumentKind, Market};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Ticker,
    Candle,
    OrderBook,
}

/// Recognized per-data-type options. Unknown keys are preserved verbatim so
/// forward-compatible adapters are not broken by a strict schema, but the
/// fields we act on are explicit (spec.md 9 "dynamic field-bag updates").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Candle timeframe(s) to request, e.g. `["1m", "1h"]`.
    #[serde(default)]
    pub timeframes: Vec<String>,
    /// Order-book depth to request from the adapter.
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Request that a specific broker stream a specific instrument.
///
/// `start_date` is immutable once the subscription exists (spec.md 4.6):
/// it is the authoritative lower bound for all reads of
/// `(symbol, broker_id)`, enforced by the date-filter query layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSubscription {
    pub id: String,
    pub symbol: String,
    pub broker_id: String,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    pub market: Market,
    pub data_types: Vec<DataType>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub settings: SubscriptionSettings,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Explicit update record: presence of a field implies intent to set it,
/// avoiding the source's optional-field-bag reflection (spec.md 9).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionUpdate {
    pub data_types: Option<Vec<DataType>>,
    pub settings: Option<SubscriptionSettings>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscriptionRequest {
    pub symbol: String,
    pub broker_id: String,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    pub market: Market,
    pub data_types: Vec<DataType>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub settings: SubscriptionSettings,
}

impl InstrumentSubscription {
    /// Subscription IDs are generated with a collision-resistant UUIDv4
    /// rather than the source's nanosecond-seeded `randomString` helper,
    /// which derived every byte from the same instant and produced an
    /// all-identical string (spec.md 9 open question; resolved here in
    /// favor of a standard collision-resistant scheme).
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn from_request(req: NewSubscriptionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Self::new_id(),
            symbol: req.symbol,
            broker_id: req.broker_id,
            kind: req.kind,
            market: req.market,
            data_types: req.data_types,
            start_date: req.start_date,
            settings: req.settings,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_update(&mut self, update: SubscriptionUpdate) {
        if let Some(data_types) = update.data_types {
            self.data_types = data_types;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = InstrumentSubscription::new_id();
        let b = InstrumentSubscription::new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn apply_update_leaves_start_date_untouched() {
        let sub = InstrumentSubscription::from_request(NewSubscriptionRequest {
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            data_types: vec![DataType::Ticker],
            start_date: Utc::now(),
            settings: SubscriptionSettings::default(),
        });
        let original_start = sub.start_date;
        let mut sub = sub;
        sub.apply_update(SubscriptionUpdate {
            data_types: Some(vec![DataType::Ticker, DataType::Candle]),
            settings: None,
            is_active: Some(true),
        });
        assert_eq!(sub.start_date, original_start);
        assert_eq!(sub.data_types.len(), 2);
        assert!(sub.is_active);
    }
}
