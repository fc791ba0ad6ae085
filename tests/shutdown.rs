//! Graceful shutdown under load (spec.md 8e): submitted samples still
//! reach storage when `Container::shutdown` is invoked shortly after.

use chrono::Utc;
use marketdata_service::config::SystemConfig;
use marketdata_service::container::Container;
use marketdata_service::models::{InstrumentKind, Market, NewInstrumentRequest, SampleEnvelope, Ticker};
use marketdata_service::storage::QueryFilter;

fn in_memory_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.database.sqlite.path = ":memory:".to_string();
    config.database.sqlite.timeseries_path = ":memory:".to_string();
    config.brokers.config_path = "/nonexistent/brokers.yaml".to_string();
    config.api.shutdown_timeout_ms = 5_000;
    config.storage.batch_size = 100;
    config.storage.dead_letter_path = tempfile::tempdir()
        .unwrap()
        .path()
        .join("dl.log")
        .to_string_lossy()
        .to_string();
    config
}

fn ticker(i: usize) -> Ticker {
    Ticker {
        envelope: SampleEnvelope {
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            market: Market::Spot,
            kind: InstrumentKind::Spot,
            timestamp: Utc::now(),
        },
        price: 50_000.0 + i as f64,
        volume: 1.0,
        bid_price: 49_999.0,
        ask_price: 50_001.0,
        change: 0.0,
        change_percent: 0.0,
        high_24h: 51_000.0,
        low_24h: 49_000.0,
        volume_24h: 0.0,
        open_interest: None,
    }
}

#[tokio::test]
async fn in_flight_samples_survive_shutdown() {
    let container = Container::build(in_memory_config()).await.unwrap();
    container
        .subscriptions
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

    for i in 0..1000 {
        container.pipeline.submit_ticker(ticker(i)).await;
    }

    let storage = container.storage.clone();
    container.shutdown().await;

    let rows = storage
        .timeseries
        .get_tickers(&QueryFilter {
            symbols: vec!["BTCUSDT".to_string()],
            limit: 2000,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(rows.len(), 1000);
}
