//! Storage Manager (C6): the single facade the rest of the system talks to.
//! Unifies the metadata store and time-series store behind one `Health()`
//! and implements `BatchSink<T>` for each sample kind so the Pipeline can
//! flush batches without knowing about SQLite at all.

use super::metadata::MetadataStore;
use super::timeseries::{QueryFilter, TimeSeriesStore};
use crate::config::DatabaseConfig;
use crate::models::{Candle, OrderBook, Ticker};
use crate::pipeline::batcher::BatchSink;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub metadata_ok: bool,
    pub timeseries_ok: bool,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        self.metadata_ok && self.timeseries_ok
    }
}

pub struct StorageManager {
    pub metadata: Arc<MetadataStore>,
    pub timeseries: Arc<TimeSeriesStore>,
}

impl StorageManager {
    pub fn open(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let metadata = Arc::new(MetadataStore::open(&config.sqlite.path)?);
        // spec.md 9 / DESIGN.md: the QuestDB fields are parsed for
        // forward compatibility but this implementation backs the
        // time-series store with the same embedded engine as metadata.
        let timeseries = Arc::new(TimeSeriesStore::open(&config.sqlite.timeseries_path)?);
        Ok(Self { metadata, timeseries })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            metadata: Arc::new(MetadataStore::open_in_memory()?),
            timeseries: Arc::new(TimeSeriesStore::open_in_memory()?),
        })
    }

    /// Health() — a probe failure in either store degrades the whole
    /// system (spec.md 4.5, surfaced through `/ready`).
    pub fn health(&self) -> StoreHealth {
        StoreHealth {
            metadata_ok: self.metadata.list_instruments().is_ok(),
            timeseries_ok: self
                .timeseries
                .get_tickers(&QueryFilter {
                    limit: 1,
                    ..Default::default()
                })
                .is_ok(),
        }
    }

    pub fn ticker_sink(self: &Arc<Self>) -> Arc<dyn BatchSink<Ticker>> {
        self.clone()
    }
    pub fn candle_sink(self: &Arc<Self>) -> Arc<dyn BatchSink<Candle>> {
        self.clone()
    }
    pub fn orderbook_sink(self: &Arc<Self>) -> Arc<dyn BatchSink<OrderBook>> {
        self.clone()
    }
}

#[async_trait]
impl BatchSink<Ticker> for StorageManager {
    async fn write_batch(&self, batch: &[Ticker]) -> anyhow::Result<()> {
        let batch = batch.to_vec();
        let store = self.timeseries.clone();
        tokio::task::spawn_blocking(move || store.save_tickers(&batch)).await??;
        Ok(())
    }
}

#[async_trait]
impl BatchSink<Candle> for StorageManager {
    async fn write_batch(&self, batch: &[Candle]) -> anyhow::Result<()> {
        let batch = batch.to_vec();
        let store = self.timeseries.clone();
        tokio::task::spawn_blocking(move || store.save_candles(&batch)).await??;
        Ok(())
    }
}

#[async_trait]
impl BatchSink<OrderBook> for StorageManager {
    async fn write_batch(&self, batch: &[OrderBook]) -> anyhow::Result<()> {
        let batch = batch.to_vec();
        let store = self.timeseries.clone();
        tokio::task::spawn_blocking(move || store.save_orderbooks(&batch)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_is_ok_for_fresh_in_memory_stores() {
        let storage = StorageManager::open_in_memory().unwrap();
        assert!(storage.health().is_healthy());
    }
}
