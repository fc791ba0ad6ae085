//! C2 — Broker Session: per-broker lifecycle (connect, subscribe,
//! heartbeat, reconnect, error accounting), grounded in the state
//! machine / backoff / heartbeat idioms of `scrapers/binance_session.rs`
//! but driving the state names and transitions of spec.md 4.1 exactly.

use super::adapter::{AdapterError, BrokerAdapter, NormalizedRecord, SubscriptionTarget};
use crate::config::BrokersConfig;
use crate::models::DataType;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Degraded,
    Backoff,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct SessionHealth {
    pub broker_id: String,
    pub state: SessionState,
    pub consecutive_errors: u32,
    pub last_seen: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

/// Exponential backoff with jitter, ported from
/// `scrapers/binance_session.rs::BackoffCalculator`: `reconnect_delay *
/// 2^min(attempt, cap)`, +/-jitter to avoid a thundering herd on mass
/// reconnects.
struct Backoff {
    base: Duration,
    cap_attempts: u32,
    attempt: u32,
}

impl Backoff {
    fn new(base: Duration, cap_attempts: u32) -> Self {
        Self {
            base,
            cap_attempts,
            attempt: 0,
        }
    }

    fn next(&mut self) -> Duration {
        let exp = self.attempt.min(self.cap_attempts);
        let millis = self.base.as_millis() as f64 * 2f64.powi(exp as i32);
        let jitter = rand::thread_rng().gen_range(-0.3..=0.3);
        let jittered = (millis * (1.0 + jitter)).max(self.base.as_millis() as f64);
        self.attempt += 1;
        Duration::from_millis(jittered as u64)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Heartbeat monitor: ping on `ping_interval`, degrade on missed pong
/// within `pong_timeout` (spec.md 4.1).
struct Heartbeat {
    ping_interval: Duration,
    pong_timeout: Duration,
    last_ping_sent: Option<tokio::time::Instant>,
    awaiting_pong: bool,
}

impl Heartbeat {
    fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            last_ping_sent: None,
            awaiting_pong: false,
        }
    }

    fn reset(&mut self) {
        self.last_ping_sent = None;
        self.awaiting_pong = false;
    }

    fn record_ping_sent(&mut self) {
        self.last_ping_sent = Some(tokio::time::Instant::now());
        self.awaiting_pong = true;
    }

    fn record_pong(&mut self) {
        self.awaiting_pong = false;
    }

    fn pong_timed_out(&self) -> bool {
        self.awaiting_pong
            && self
                .last_ping_sent
                .is_some_and(|t| t.elapsed() > self.pong_timeout)
    }

    fn due_for_ping(&self) -> bool {
        if self.awaiting_pong {
            return false;
        }
        match self.last_ping_sent {
            None => true,
            Some(t) => t.elapsed() > self.ping_interval,
        }
    }
}

/// Owns one adapter instance; manages connection state machine, retries,
/// subscriptions (C2). Cloneable handle shared with the Broker Manager and
/// HTTP layer; internal mutable state lives behind `RwLock`s so reads
/// (`health`) are cheap and concurrent, matching the registry discipline
/// of spec.md 5.
pub struct BrokerSession {
    broker_id: String,
    adapter: Arc<dyn BrokerAdapter>,
    config: BrokersConfig,
    state: RwLock<SessionState>,
    consecutive_errors: AtomicU32,
    reconnect_attempts: AtomicU32,
    last_seen_ms: AtomicU64,
    /// Desired subscription set; `Subscribe`/`Unsubscribe` mutate this
    /// regardless of current state. The next `Connected` entry replays it.
    target: RwLock<HashSet<SubscriptionTarget>>,
}

impl BrokerSession {
    pub fn new(broker_id: String, adapter: Arc<dyn BrokerAdapter>, config: BrokersConfig) -> Self {
        Self {
            broker_id,
            adapter,
            config,
            state: RwLock::new(SessionState::Idle),
            consecutive_errors: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
            last_seen_ms: AtomicU64::new(0),
            target: RwLock::new(HashSet::new()),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, next: SessionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            info!(broker_id = %self.broker_id, from = %prev, to = %next, "session state transition");
        }
    }

    fn mark_seen(&self) {
        self.last_seen_ms.store(
            Utc::now().timestamp_millis() as u64,
            Ordering::Relaxed,
        );
    }

    pub fn health(&self) -> SessionHealth {
        let ms = self.last_seen_ms.load(Ordering::Relaxed);
        SessionHealth {
            broker_id: self.broker_id.clone(),
            state: self.state(),
            consecutive_errors: self.consecutive_errors.load(Ordering::Relaxed),
            last_seen: if ms == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(ms as i64)
            },
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Record intent regardless of current state; convergence happens on
    /// the next `Connected` entry (spec.md 4.1).
    pub fn subscribe(&self, targets: Vec<SubscriptionTarget>) {
        self.target.write().extend(targets);
    }

    pub fn unsubscribe(&self, targets: &[SubscriptionTarget]) {
        let mut guard = self.target.write();
        for t in targets {
            guard.remove(t);
        }
    }

    pub fn target_set(&self) -> HashSet<SubscriptionTarget> {
        self.target.read().clone()
    }

    fn record_error(&self) -> u32 {
        let n = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if self.state() == SessionState::Connected && n >= self.config.max_consecutive_errors {
            self.set_state(SessionState::Degraded);
        }
        n
    }

    fn reset_errors(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// Replay all active subscriptions to the adapter. Called on entering
    /// `Connected`.
    async fn replay_subscriptions(&self) -> Result<(), AdapterError> {
        let targets: Vec<_> = self.target.read().iter().cloned().collect();
        if targets.is_empty() {
            return Ok(());
        }
        self.adapter.subscribe(&targets).await
    }

    /// Drive the session's lifecycle until `cancel` fires. Normalized
    /// records are forwarded to `out`.
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        out: mpsc::Sender<NormalizedRecord>,
    ) {
        let mut backoff = Backoff::new(
            self.config.reconnect_delay(),
            self.config.backoff_cap_attempts,
        );
        let mut heartbeat = Heartbeat::new(
            Duration::from_millis(self.config.ping_interval_ms),
            Duration::from_millis(self.config.pong_timeout_ms),
        );

        self.set_state(SessionState::Connecting);

        loop {
            if cancel.is_cancelled() {
                self.stop().await;
                return;
            }

            match self.state() {
                SessionState::Connecting => {
                    let (tx, mut rx) = mpsc::channel(1024);
                    match self.adapter.connect(tx).await {
                        Ok(()) => {
                            if let Err(e) = self.replay_subscriptions().await {
                                warn!(broker_id = %self.broker_id, error = %e, "resubscribe failed");
                            }
                            self.reset_errors();
                            backoff.reset();
                            heartbeat.reset();
                            self.mark_seen();
                            self.set_state(SessionState::Connected);

                            // Drain this connection's records until it closes
                            // or we transition away from Connected.
                            while self.state() == SessionState::Connected {
                                tokio::select! {
                                    _ = cancel.cancelled() => {
                                        self.stop().await;
                                        return;
                                    }
                                    maybe_record = rx.recv() => {
                                        match maybe_record {
                                            Some(record) => {
                                                self.mark_seen();
                                                heartbeat.reset();
                                                if out.send(record).await.is_err() {
                                                    return;
                                                }
                                            }
                                            None => {
                                                self.record_error();
                                                self.set_state(SessionState::Degraded);
                                            }
                                        }
                                    }
                                    _ = tokio::time::sleep(Duration::from_millis(200)) => {
                                        if heartbeat.pong_timed_out() || heartbeat.due_for_ping() {
                                            match self.adapter.ping().await {
                                                Ok(true) => heartbeat.record_pong(),
                                                Ok(false) => heartbeat.record_ping_sent(),
                                                Err(_) => {
                                                    self.record_error();
                                                    self.set_state(SessionState::Degraded);
                                                }
                                            }
                                        }
                                        if heartbeat.pong_timed_out() {
                                            self.record_error();
                                            self.set_state(SessionState::Degraded);
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            debug!(broker_id = %self.broker_id, error = %e, "connect failed");
                            self.record_error();
                            self.set_state(SessionState::Degraded);
                        }
                    }
                }
                SessionState::Degraded => {
                    self.set_state(SessionState::Backoff);
                }
                SessionState::Backoff => {
                    let attempts = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempts > self.config.max_reconnects {
                        warn!(broker_id = %self.broker_id, "max reconnects exhausted, stopping");
                        self.set_state(SessionState::Stopped);
                        return;
                    }
                    let delay = backoff.next();
                    debug!(broker_id = %self.broker_id, delay_ms = delay.as_millis(), attempt = backoff.attempt(), "backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.stop().await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(SessionState::Connecting);
                }
                SessionState::Stopped => return,
                SessionState::Idle | SessionState::Connected => {
                    // Connected is handled inline above; Idle only occurs
                    // before the first loop iteration.
                    self.set_state(SessionState::Connecting);
                }
            }
        }
    }

    pub async fn stop(&self) {
        self.set_state(SessionState::Stopped);
        let _ = self.adapter.disconnect().await;
    }
}

pub fn targets_for(symbol: &str, data_types: &[DataType]) -> Vec<SubscriptionTarget> {
    data_types
        .iter()
        .map(|dt| SubscriptionTarget {
            symbol: symbol.to_string(),
            data_type: *dt,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), 3);
        let mut previous = 0u128;
        for _ in 0..6 {
            let d = b.next();
            // base * 2^min(attempt,cap) +/- 30% jitter; just assert it never
            // collapses to zero and stays within a generous bound.
            assert!(d.as_millis() >= 100);
            assert!(d.as_millis() <= 100 * 2u128.pow(3) * 2);
            previous = previous.max(d.as_millis());
        }
        assert!(previous > 0);
    }

    #[test]
    fn heartbeat_requires_ping_before_pong_timeout() {
        let hb = Heartbeat::new(Duration::from_millis(10), Duration::from_millis(10));
        assert!(!hb.pong_timed_out());
        assert!(hb.due_for_ping());
    }
}
