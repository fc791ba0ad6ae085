//! Dependency Container (C10): constructs and wires C2-C9, owns shutdown
//! order. The source uses a dynamic service registry keyed by string names;
//! reimplemented here as explicit construction in one wiring function
//! producing a struct of dependency-inverted collaborators (spec.md 9).
//! Lifetimes are explicit; teardown runs in reverse construction order.

use crate::broker::{BrokerAdapter, BrokerManager, NormalizedRecord};
use crate::config::SystemConfig;
use crate::models::BrokerConfig;
use crate::pipeline::{Pipeline, PipelineSinks};
use crate::query::QueryService;
use crate::retention::RetentionWorker;
use crate::storage::StorageManager;
use crate::subscriptions::SubscriptionRegistry;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
struct BrokerConfigFile {
    #[serde(default)]
    brokers: Vec<BrokerConfig>,
}

fn load_broker_configs(path: &str) -> Vec<BrokerConfig> {
    let path = std::path::Path::new(path);
    if !path.exists() {
        warn!(path = %path.display(), "broker config file not found, starting with no brokers registered");
        return Vec::new();
    }
    match std::fs::read_to_string(path).and_then(|s| {
        serde_yaml::from_str::<BrokerConfigFile>(&s)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }) {
        Ok(file) => file.brokers,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse broker config, starting with no brokers registered");
            Vec::new()
        }
    }
}

/// The only adapter kind this service ships; genuine wire protocols are an
/// external collaborator (spec.md 1). Any broker listed in `brokers.yaml`
/// is wired up against it so the rest of the pipeline can be exercised
/// end-to-end regardless of which concrete venues are configured.
fn adapter_for(config: &BrokerConfig) -> Arc<dyn BrokerAdapter> {
    Arc::new(crate::broker::mock_adapter::MockAdapter::new(
        config.adapter_kind.clone(),
    ))
}

/// Owns every process-wide collaborator. The sole owner of process-wide
/// state; construction happens once in `build`, teardown once in `shutdown`
/// (spec.md 9 "global mutable state: none required").
pub struct Container {
    pub config: SystemConfig,
    pub storage: Arc<StorageManager>,
    pub brokers: Arc<BrokerManager>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub query: Arc<QueryService>,
    router_handle: Option<JoinHandle<()>>,
    retention_handle: Option<JoinHandle<()>>,
    retention_cancel: CancellationToken,
}

impl Container {
    pub async fn build(config: SystemConfig) -> anyhow::Result<Self> {
        let storage = Arc::new(StorageManager::open(&config.database)?);
        let brokers = Arc::new(BrokerManager::new(config.brokers.clone()));
        let subscriptions = Arc::new(SubscriptionRegistry::load(
            storage.metadata.clone(),
            brokers.clone(),
        )?);

        let sinks = PipelineSinks {
            tickers: storage.ticker_sink(),
            candles: storage.candle_sink(),
            orderbooks: storage.orderbook_sink(),
        };
        let pipeline = Arc::new(Pipeline::new(
            config.storage.clone(),
            subscriptions.clone(),
            sinks,
        ));
        pipeline.start()?;

        let (record_tx, record_rx) = tokio::sync::mpsc::channel::<NormalizedRecord>(4096);
        let router_handle = tokio::spawn(route_records(pipeline.clone(), record_rx));

        for broker_config in load_broker_configs(&config.brokers.config_path) {
            let broker_id = broker_config.broker_id.clone();
            let adapter = adapter_for(&broker_config);
            brokers.add(broker_id.clone(), adapter, record_tx.clone());
            info!(broker_id = %broker_id, "broker session registered");
        }
        subscriptions.sync_with_brokers()?;

        let query = Arc::new(QueryService::new(storage.timeseries.clone(), subscriptions.clone()));

        let retention_cancel = CancellationToken::new();
        let retention_worker = RetentionWorker::new(config.storage.clone(), storage.timeseries.clone());
        let retention_handle = tokio::spawn(retention_worker.run(retention_cancel.clone()));

        Ok(Self {
            config,
            storage,
            brokers,
            subscriptions,
            pipeline,
            query,
            router_handle: Some(router_handle),
            retention_handle: Some(retention_handle),
            retention_cancel,
        })
    }

    /// `true` iff every live broker session is healthy and both stores
    /// answer (spec.md 6 `/ready`).
    pub fn is_ready(&self) -> bool {
        self.storage.health().is_healthy() && self.brokers.is_healthy()
    }

    /// Reverse-construction-order teardown (spec.md 9): stop accepting new
    /// broker records first, drain the pipeline, then cancel the
    /// background worker.
    pub async fn shutdown(self) {
        self.retention_cancel.cancel();
        if let Some(h) = self.retention_handle {
            let _ = h.await;
        }

        for session in self.brokers.list() {
            let _ = self.brokers.remove(session.broker_id()).await;
        }

        self.pipeline.stop(self.config.api.shutdown_timeout()).await;

        if let Some(h) = self.router_handle {
            h.abort();
        }
        info!("container shutdown complete");
    }
}

/// Drains normalized records from every broker session and routes them to
/// the pipeline's per-kind validate/enqueue entry points (spec.md 2 flow:
/// "A Broker Session receives a raw record, normalizes it, and submits it
/// to the Data Pipeline").
async fn route_records(
    pipeline: Arc<Pipeline>,
    mut rx: tokio::sync::mpsc::Receiver<NormalizedRecord>,
) {
    while let Some(record) = rx.recv().await {
        match record {
            NormalizedRecord::Ticker(t) => pipeline.submit_ticker(t).await,
            NormalizedRecord::Candle(c) => pipeline.submit_candle(c).await,
            NormalizedRecord::OrderBook(ob) => pipeline.submit_orderbook(ob).await,
        }
    }
}
