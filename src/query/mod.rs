//! Date-Filter Query Service (C8): wraps the time-series store's `Get*`
//! operations with the effective lower bound each subscription imposes
//! (spec.md 4.7) — `start_date` is the authoritative floor below which a
//! broker feed has no validated history, so a query is clamped to it
//! rather than silently returning data predating the subscription.

use crate::models::{Candle, OrderBook, Ticker, Timeframe};
use crate::storage::{QueryFilter, TimeSeriesStore};
use crate::subscriptions::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Caller-supplied query parameters before the effective `start_date`
/// floor is applied.
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    pub symbols: Vec<String>,
    pub broker_ids: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeframe: Option<Timeframe>,
    pub limit: usize,
}

pub struct QueryService {
    timeseries: Arc<TimeSeriesStore>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl QueryService {
    pub fn new(timeseries: Arc<TimeSeriesStore>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self {
            timeseries,
            subscriptions,
        }
    }

    /// Raises `query.start_time` to the earliest active subscription's
    /// `start_date` for each requested symbol, when that is later than
    /// what the caller asked for. Symbols with no subscription impose no
    /// floor and pass through unfiltered (spec.md 4.7).
    fn effective_start(&self, query: &DataQuery) -> Option<DateTime<Utc>> {
        let broker_id = match query.broker_ids.as_slice() {
            [single] => Some(single.as_str()),
            _ => None,
        };

        let floor = query
            .symbols
            .iter()
            .filter_map(|symbol| self.subscriptions.earliest_start_date(symbol, broker_id))
            .min();

        match (query.start_time, floor) {
            (Some(requested), Some(floor)) => Some(requested.max(floor)),
            (Some(requested), None) => Some(requested),
            (None, floor) => floor,
        }
    }

    fn filter(&self, query: &DataQuery) -> QueryFilter {
        QueryFilter {
            symbols: query.symbols.clone(),
            broker_ids: query.broker_ids.clone(),
            start_time: self.effective_start(query),
            end_time: query.end_time,
            timeframe: query.timeframe,
            limit: query.limit,
        }
    }

    pub fn tickers(&self, query: &DataQuery) -> anyhow::Result<Vec<Ticker>> {
        self.timeseries.get_tickers(&self.filter(query))
    }

    pub fn candles(&self, query: &DataQuery) -> anyhow::Result<Vec<Candle>> {
        self.timeseries.get_candles(&self.filter(query))
    }

    pub fn latest_orderbook(
        &self,
        symbol: &str,
        broker_id: Option<&str>,
        depth: usize,
    ) -> anyhow::Result<Option<OrderBook>> {
        self.timeseries.get_latest_orderbook(symbol, broker_id, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerManager;
    use crate::config::BrokersConfig;
    use crate::models::{DataType, InstrumentKind, Market, NewInstrumentRequest, NewSubscriptionRequest, SampleEnvelope, SubscriptionSettings};
    use crate::storage::MetadataStore;

    fn registry() -> Arc<SubscriptionRegistry> {
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let brokers = Arc::new(BrokerManager::new(BrokersConfig::default()));
        Arc::new(SubscriptionRegistry::load(metadata, brokers).unwrap())
    }

    fn ticker(symbol: &str, ts: DateTime<Utc>) -> Ticker {
        Ticker {
            envelope: SampleEnvelope {
                symbol: symbol.to_string(),
                broker_id: "binance".to_string(),
                market: Market::Spot,
                kind: InstrumentKind::Spot,
                timestamp: ts,
            },
            price: 1.0,
            volume: 1.0,
            bid_price: 1.0,
            ask_price: 1.0,
            change: 0.0,
            change_percent: 0.0,
            high_24h: 1.0,
            low_24h: 1.0,
            volume_24h: 0.0,
            open_interest: None,
        }
    }

    #[test]
    fn query_floors_start_time_to_subscription_start_date() {
        let timeseries = Arc::new(TimeSeriesStore::open_in_memory().unwrap());
        let sub_reg = registry();

        sub_reg
            .add_instrument(NewInstrumentRequest {
                symbol: "BTCUSDT".to_string(),
                base_asset: "BTC".to_string(),
                quote_asset: "USDT".to_string(),
                kind: InstrumentKind::Spot,
                market: Market::Spot,
                is_active: true,
                min_price: 0.0,
                max_price: 1_000_000.0,
                min_quantity: 0.0,
                max_quantity: 10_000.0,
                price_precision: 2,
                quantity_precision: 3,
            })
            .unwrap();

        let floor = Utc::now() - chrono::Duration::hours(1);
        sub_reg
            .add_subscription(NewSubscriptionRequest {
                symbol: "BTCUSDT".to_string(),
                broker_id: "binance".to_string(),
                kind: InstrumentKind::Spot,
                market: Market::Spot,
                data_types: vec![DataType::Ticker],
                start_date: floor,
                settings: SubscriptionSettings::default(),
            })
            .unwrap();

        let old = ticker("BTCUSDT", Utc::now() - chrono::Duration::hours(5));
        let recent = ticker("BTCUSDT", Utc::now());
        timeseries.save_tickers(&[old, recent]).unwrap();

        let service = QueryService::new(timeseries, sub_reg);
        let query = DataQuery {
            symbols: vec!["BTCUSDT".to_string()],
            limit: 100,
            ..Default::default()
        };
        let rows = service.tickers(&query).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn unsubscribed_symbol_passes_through_unfiltered() {
        let timeseries = Arc::new(TimeSeriesStore::open_in_memory().unwrap());
        let sub_reg = registry();
        let old = ticker("ETHUSDT", Utc::now() - chrono::Duration::days(30));
        timeseries.save_tickers(&[old]).unwrap();

        let service = QueryService::new(timeseries, sub_reg);
        let query = DataQuery {
            symbols: vec!["ETHUSDT".to_string()],
            limit: 100,
            ..Default::default()
        };
        let rows = service.tickers(&query).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
