//! Data Pipeline (C5): validates inbound samples, buffers them in bounded
//! per-kind queues, and batches them into storage. Exposes the
//! `Submit`/`Start`/`Stop`/`Flush` contract spec.md 4.4 describes.

pub mod batcher;
pub mod dead_letter;
pub mod queue;

use crate::config::StorageConfig;
use crate::error::RejectReason;
use crate::models::{Candle, Instrument, OrderBook, Ticker};
use crate::validator::{self, ValidationContext};
use batcher::{BatchSink, Batcher, BatcherConfig, BatcherMetrics, FlushSignal};
use chrono::Utc;
use dead_letter::DeadLetterLog;
use queue::{bounded, QueueProducer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-record-kind rejection/ingress counters surfaced on `/health` (spec.md 6).
#[derive(Default)]
pub struct PipelineMetrics {
    pub tickers_submitted: AtomicU64,
    pub candles_submitted: AtomicU64,
    pub orderbooks_submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub dropped_on_overflow: AtomicU64,
    pub ticker_batcher: Arc<BatcherMetrics>,
    pub candle_batcher: Arc<BatcherMetrics>,
    pub orderbook_batcher: Arc<BatcherMetrics>,
}

/// Storage-facing sinks the pipeline batches into. Implemented by the
/// Storage Manager (C6); kept as a trait object here so this module never
/// depends on the storage crate internals.
pub struct PipelineSinks {
    pub tickers: Arc<dyn BatchSink<Ticker>>,
    pub candles: Arc<dyn BatchSink<Candle>>,
    pub orderbooks: Arc<dyn BatchSink<OrderBook>>,
}

/// Per-record instrument lookup the validator needs for bounds/precision
/// checks. Implemented by the Instrument & Subscription Manager (C7); kept
/// as a trait so the pipeline has no direct dependency on that registry.
pub trait InstrumentLookup: Send + Sync {
    fn lookup(&self, broker_id: &str, symbol: &str) -> Option<Instrument>;
}

struct KindTasks {
    producer_ticker: QueueProducer<Ticker>,
    producer_candle: QueueProducer<Candle>,
    producer_orderbook: QueueProducer<OrderBook>,
    flush_ticker: FlushSignal,
    flush_candle: FlushSignal,
    flush_orderbook: FlushSignal,
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Entry point for submitting normalized samples and controlling the
/// pipeline's lifecycle.
pub struct Pipeline {
    config: StorageConfig,
    instruments: Arc<dyn InstrumentLookup>,
    tasks: parking_lot::RwLock<Option<KindTasks>>,
    sinks: PipelineSinks,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(config: StorageConfig, instruments: Arc<dyn InstrumentLookup>, sinks: PipelineSinks) -> Self {
        Self {
            config,
            instruments,
            tasks: parking_lot::RwLock::new(None),
            sinks,
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    fn context(&self) -> (chrono::Duration, chrono::Duration) {
        let retention_horizon = chrono::Duration::from_std(self.config.retention_period())
            .unwrap_or(chrono::Duration::max_value());
        (retention_horizon, self.config.clock_skew_tolerance())
    }

    /// Spin up one queue + batcher pair per record kind. Idempotent: calling
    /// `start` twice without an intervening `stop` is a no-op.
    pub fn start(&self) -> anyhow::Result<()> {
        if self.tasks.read().is_some() {
            return Ok(());
        }

        let dead_letter = Arc::new(DeadLetterLog::open(&self.config.dead_letter_path)?);
        let cancel = CancellationToken::new();

        let batcher_config = BatcherConfig {
            batch_size: self.config.batch_size,
            flush_interval: self.config.flush_interval(),
            max_retries: self.config.max_batch_retries,
            retry_base: Duration::from_millis(100),
        };

        let (tx_ticker, rx_ticker) = bounded::<Ticker>(self.config.queue_capacity);
        let (tx_candle, rx_candle) = bounded::<Candle>(self.config.queue_capacity);
        let (tx_orderbook, rx_orderbook) = bounded::<OrderBook>(self.config.queue_capacity);

        let flush_ticker = FlushSignal::new();
        let flush_candle = FlushSignal::new();
        let flush_orderbook = FlushSignal::new();

        let ticker_batcher = Batcher::new(
            "ticker",
            rx_ticker,
            self.sinks.tickers.clone(),
            dead_letter.clone(),
            batcher_config.clone(),
            flush_ticker.clone(),
            self.metrics.ticker_batcher.clone(),
        );
        let candle_batcher = Batcher::new(
            "candle",
            rx_candle,
            self.sinks.candles.clone(),
            dead_letter.clone(),
            batcher_config.clone(),
            flush_candle.clone(),
            self.metrics.candle_batcher.clone(),
        );
        let orderbook_batcher = Batcher::new(
            "orderbook",
            rx_orderbook,
            self.sinks.orderbooks.clone(),
            dead_letter.clone(),
            batcher_config,
            flush_orderbook.clone(),
            self.metrics.orderbook_batcher.clone(),
        );

        let handles = vec![
            tokio::spawn(ticker_batcher.run(cancel.clone())),
            tokio::spawn(candle_batcher.run(cancel.clone())),
            tokio::spawn(orderbook_batcher.run(cancel.clone())),
        ];

        *self.tasks.write() = Some(KindTasks {
            producer_ticker: tx_ticker,
            producer_candle: tx_candle,
            producer_orderbook: tx_orderbook,
            flush_ticker,
            flush_candle,
            flush_orderbook,
            handles,
            cancel,
        });

        info!("pipeline started");
        Ok(())
    }

    /// Cancel all batchers and wait for their final flush, bounded by
    /// `shutdown_timeout`. Each batcher drains and flushes whatever is
    /// buffered before returning.
    pub async fn stop(&self, shutdown_timeout: Duration) {
        let tasks = self.tasks.write().take();
        let Some(tasks) = tasks else { return };

        tasks.producer_ticker.close();
        tasks.producer_candle.close();
        tasks.producer_orderbook.close();
        tasks.cancel.cancel();

        let join_all = join_all_handles(tasks.handles);
        if tokio::time::timeout(shutdown_timeout, join_all).await.is_err() {
            warn!("pipeline shutdown exceeded timeout, some batches may be unflushed");
        }
        info!("pipeline stopped");
    }

    /// Request an immediate flush of all buffered batches without waiting
    /// for size/interval triggers.
    pub fn flush(&self) {
        if let Some(tasks) = self.tasks.read().as_ref() {
            tasks.flush_ticker.trigger();
            tasks.flush_candle.trigger();
            tasks.flush_orderbook.trigger();
        }
    }

    pub async fn submit_ticker(&self, ticker: Ticker) {
        let instrument = self
            .instruments
            .lookup(&ticker.envelope.broker_id, &ticker.envelope.symbol);
        let (retention_horizon, clock_skew_tolerance) = self.context();
        let ctx = ValidationContext {
            instrument: instrument.as_ref(),
            now: Utc::now(),
            retention_horizon,
            clock_skew_tolerance,
        };
        if let Err(reason) = validator::validate_ticker(&ticker, &ctx) {
            self.reject(reason);
            return;
        }
        self.metrics.tickers_submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueue(|t| &t.producer_ticker, ticker).await;
    }

    pub async fn submit_candle(&self, candle: Candle) {
        let instrument = self
            .instruments
            .lookup(&candle.envelope.broker_id, &candle.envelope.symbol);
        let (retention_horizon, clock_skew_tolerance) = self.context();
        let ctx = ValidationContext {
            instrument: instrument.as_ref(),
            now: Utc::now(),
            retention_horizon,
            clock_skew_tolerance,
        };
        if let Err(reason) = validator::validate_candle(&candle, &ctx) {
            self.reject(reason);
            return;
        }
        self.metrics.candles_submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueue(|t| &t.producer_candle, candle).await;
    }

    pub async fn submit_orderbook(&self, orderbook: OrderBook) {
        let instrument = self
            .instruments
            .lookup(&orderbook.envelope.broker_id, &orderbook.envelope.symbol);
        let (retention_horizon, clock_skew_tolerance) = self.context();
        let ctx = ValidationContext {
            instrument: instrument.as_ref(),
            now: Utc::now(),
            retention_horizon,
            clock_skew_tolerance,
        };
        if let Err(reason) = validator::validate_orderbook(&orderbook, &ctx) {
            self.reject(reason);
            return;
        }
        self.metrics
            .orderbooks_submitted
            .fetch_add(1, Ordering::Relaxed);
        self.enqueue(|t| &t.producer_orderbook, orderbook).await;
    }

    fn reject(&self, reason: RejectReason) {
        self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(%reason, "sample rejected by validator");
    }

    /// Forwards directly into the bounded queue on the caller's own task, so
    /// two records of the same kind submitted back-to-back keep enqueue
    /// order == arrival order (spec.md 4.4's ordering guarantee). `submit`
    /// blocks briefly for space and falls back to drop-oldest; it does not
    /// reorder.
    async fn enqueue<T, F>(&self, select: F, item: T)
    where
        F: FnOnce(&KindTasks) -> &QueueProducer<T>,
        T: Send + 'static,
    {
        let producer = {
            let guard = self.tasks.read();
            let Some(tasks) = guard.as_ref() else {
                warn!("pipeline not started, dropping sample");
                return;
            };
            select(tasks).clone()
        };
        let timeout = self.config.submit_timeout();
        let dropped_before = producer.dropped_count();
        producer.submit(item, timeout).await;
        if producer.dropped_count() > dropped_before {
            self.metrics
                .dropped_on_overflow
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn join_all_handles(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentKind, Market};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct RecordingSink<T> {
        records: Arc<Mutex<Vec<T>>>,
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> BatchSink<T> for RecordingSink<T> {
        async fn write_batch(&self, batch: &[T]) -> anyhow::Result<()> {
            self.records.lock().extend_from_slice(batch);
            Ok(())
        }
    }

    struct StaticLookup(HashMap<(String, String), Instrument>);

    impl InstrumentLookup for StaticLookup {
        fn lookup(&self, broker_id: &str, symbol: &str) -> Option<Instrument> {
            self.0
                .get(&(broker_id.to_string(), symbol.to_string()))
                .cloned()
        }
    }

    fn instrument() -> Instrument {
        Instrument {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            is_active: true,
            min_price: 0.01,
            max_price: 1_000_000.0,
            min_quantity: 0.001,
            max_quantity: 10_000.0,
            price_precision: 2,
            quantity_precision: 6,
        }
    }

    fn lookup() -> Arc<dyn InstrumentLookup> {
        let mut map = HashMap::new();
        map.insert(("binance".to_string(), "BTCUSDT".to_string()), instrument());
        Arc::new(StaticLookup(map))
    }

    fn test_ticker() -> Ticker {
        Ticker {
            envelope: crate::models::SampleEnvelope {
                symbol: "BTCUSDT".to_string(),
                broker_id: "binance".to_string(),
                market: Market::Spot,
                kind: InstrumentKind::Spot,
                timestamp: Utc::now(),
            },
            price: 50000.0,
            volume: 1.0,
            bid_price: 49999.0,
            ask_price: 50001.0,
            change: 1.0,
            change_percent: 0.01,
            high_24h: 51000.0,
            low_24h: 49000.0,
            volume_24h: 1000.0,
            open_interest: None,
        }
    }

    fn test_config() -> StorageConfig {
        let mut config = StorageConfig::default();
        config.batch_size = 1;
        config.dead_letter_path = tempfile::tempdir()
            .unwrap()
            .path()
            .join("dl.log")
            .to_string_lossy()
            .to_string();
        config
    }

    fn empty_sinks() -> PipelineSinks {
        PipelineSinks {
            tickers: Arc::new(RecordingSink {
                records: Arc::new(Mutex::new(Vec::new())),
            }),
            candles: Arc::new(RecordingSink {
                records: Arc::new(Mutex::new(Vec::new())),
            }),
            orderbooks: Arc::new(RecordingSink {
                records: Arc::new(Mutex::new(Vec::new())),
            }),
        }
    }

    #[tokio::test]
    async fn submitted_ticker_is_flushed_to_sink() {
        let tickers = Arc::new(Mutex::new(Vec::new()));
        let mut sinks = empty_sinks();
        sinks.tickers = Arc::new(RecordingSink {
            records: tickers.clone(),
        });
        let pipeline = Pipeline::new(test_config(), lookup(), sinks);
        pipeline.start().unwrap();

        pipeline.submit_ticker(test_ticker()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(tickers.lock().len(), 1);
        pipeline.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn rejected_ticker_never_reaches_sink() {
        let tickers = Arc::new(Mutex::new(Vec::new()));
        let mut sinks = empty_sinks();
        sinks.tickers = Arc::new(RecordingSink {
            records: tickers.clone(),
        });
        let pipeline = Pipeline::new(test_config(), lookup(), sinks);
        pipeline.start().unwrap();

        let mut bad = test_ticker();
        bad.envelope.symbol = "UNKNOWN".to_string();
        pipeline.submit_ticker(bad).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(tickers.lock().len(), 0);
        assert_eq!(pipeline.metrics().rejected.load(Ordering::SeqCst), 1);
        pipeline.stop(Duration::from_secs(1)).await;
    }
}
