//! A reference in-process adapter used by tests and the default config so
//! the pipeline can be exercised end-to-end without a real network
//! dependency (no concrete broker wire protocol ships with this service;
//! spec.md 1 keeps that out of scope). Shape grounded in
//! `scrapers/binance_price_feed.rs`'s adapter-to-channel pattern.

use super::adapter::{
    AdapterCapabilities, AdapterError, BrokerAdapter, NormalizedRecord, SubscriptionTarget,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct MockAdapter {
    kind: String,
    connected: AtomicBool,
    subscribed: Mutex<Vec<SubscriptionTarget>>,
    /// Queue of records to emit the next time a caller drains via `push`
    /// + the session's connect loop; tests populate this directly.
    pending: Mutex<Vec<NormalizedRecord>>,
}

impl MockAdapter {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            connected: AtomicBool::new(false),
            subscribed: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, record: NormalizedRecord) {
        self.pending.lock().push(record);
    }

    pub fn subscribed_targets(&self) -> Vec<SubscriptionTarget> {
        self.subscribed.lock().clone()
    }
}

#[async_trait]
impl BrokerAdapter for MockAdapter {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            max_symbols_per_connection: 200,
        }
    }

    async fn connect(
        &self,
        tx: tokio::sync::mpsc::Sender<NormalizedRecord>,
    ) -> Result<(), AdapterError> {
        self.connected.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for record in pending {
            let _ = tx.send(record).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, targets: &[SubscriptionTarget]) -> Result<(), AdapterError> {
        self.subscribed.lock().extend_from_slice(targets);
        Ok(())
    }

    async fn unsubscribe(&self, targets: &[SubscriptionTarget]) -> Result<(), AdapterError> {
        self.subscribed.lock().retain(|t| !targets.contains(t));
        Ok(())
    }

    async fn ping(&self) -> Result<bool, AdapterError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }
}
