//! C3 — Broker Manager: registry of sessions keyed by `broker_id`, health
//! aggregation, lifecycle fan-out. Adds/removes serialize; reads see a
//! consistent snapshot (spec.md 4.2, 5), mirrored here with
//! `parking_lot::RwLock` the way the teacher guards short-lived shared
//! state (`routes.rs`: "parking_lot - no await needed").

use super::adapter::{BrokerAdapter, SubscriptionTarget};
use super::session::{BrokerSession, SessionHealth};
use crate::config::BrokersConfig;
use crate::error::{AppError, AppResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct BrokerManager {
    sessions: RwLock<HashMap<String, Arc<BrokerSession>>>,
    tokens: RwLock<HashMap<String, CancellationToken>>,
    config: BrokersConfig,
}

impl BrokerManager {
    pub fn new(config: BrokersConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a new session and start it. Serializes with other
    /// add/remove calls.
    pub fn add(
        &self,
        broker_id: String,
        adapter: Arc<dyn BrokerAdapter>,
        out: tokio::sync::mpsc::Sender<super::adapter::NormalizedRecord>,
    ) -> Arc<BrokerSession> {
        let session = Arc::new(BrokerSession::new(
            broker_id.clone(),
            adapter,
            self.config.clone(),
        ));
        let token = CancellationToken::new();

        self.sessions
            .write()
            .insert(broker_id.clone(), session.clone());
        self.tokens.write().insert(broker_id.clone(), token.clone());

        tokio::spawn(session.clone().run(token, out));
        session
    }

    /// Transitions the session to `Stopped` and evicts it only after the
    /// session acknowledges termination (spec.md 4.2).
    pub async fn remove(&self, broker_id: &str) -> AppResult<()> {
        let (session, token) = {
            let sessions = self.sessions.read();
            let tokens = self.tokens.read();
            (sessions.get(broker_id).cloned(), tokens.get(broker_id).cloned())
        };
        let (session, token) = match (session, token) {
            (Some(s), Some(t)) => (s, t),
            _ => return Err(AppError::NotFound(format!("broker {broker_id}"))),
        };
        token.cancel();
        session.stop().await;
        self.sessions.write().remove(broker_id);
        self.tokens.write().remove(broker_id);
        Ok(())
    }

    pub fn get(&self, broker_id: &str) -> Option<Arc<BrokerSession>> {
        self.sessions.read().get(broker_id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<BrokerSession>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn subscribe(&self, broker_id: &str, targets: Vec<SubscriptionTarget>) -> AppResult<()> {
        let session = self
            .get(broker_id)
            .ok_or_else(|| AppError::NotFound(format!("broker {broker_id}")))?;
        session.subscribe(targets);
        Ok(())
    }

    pub fn unsubscribe(&self, broker_id: &str, targets: &[SubscriptionTarget]) -> AppResult<()> {
        let session = self
            .get(broker_id)
            .ok_or_else(|| AppError::NotFound(format!("broker {broker_id}")))?;
        session.unsubscribe(targets);
        Ok(())
    }

    /// `HealthCheck() -> id -> error`: here surfaced as a snapshot per
    /// broker; degraded/backoff/stopped sessions are the "error" case.
    pub fn health_check(&self) -> HashMap<String, SessionHealth> {
        self.sessions
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.health()))
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.sessions.read().values().all(|s| {
            !matches!(
                s.state(),
                super::session::SessionState::Stopped | super::session::SessionState::Backoff
            )
        })
    }
}
