//! Instrument & Subscription Manager (C7): the authoritative in-memory
//! registry of instruments and subscriptions, reconciled against the
//! Broker Manager's live session targets. Guarded by the single
//! reader-writer-lock discipline spec.md 5 prescribes for this registry,
//! the same `parking_lot::RwLock` idiom as `BrokerManager`.

use crate::broker::{BrokerManager, SubscriptionTarget};
use crate::error::{AppError, AppResult};
use crate::models::{
    DataType, Instrument, InstrumentSubscription, InstrumentUpdate, NewInstrumentRequest,
    NewSubscriptionRequest, SubscriptionUpdate,
};
use crate::pipeline::InstrumentLookup;
use crate::storage::MetadataStore;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct SubscriptionRegistry {
    instruments: RwLock<HashMap<String, Instrument>>,
    subscriptions: RwLock<HashMap<String, InstrumentSubscription>>,
    metadata: Arc<MetadataStore>,
    brokers: Arc<BrokerManager>,
}

impl SubscriptionRegistry {
    /// Loads the in-memory registry from the metadata store. Call once
    /// during container construction, before the HTTP server starts
    /// accepting traffic.
    pub fn load(metadata: Arc<MetadataStore>, brokers: Arc<BrokerManager>) -> anyhow::Result<Self> {
        let instruments = metadata
            .list_instruments()?
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        let subscriptions = metadata
            .list_subscriptions()?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Ok(Self {
            instruments: RwLock::new(instruments),
            subscriptions: RwLock::new(subscriptions),
            metadata,
            brokers,
        })
    }

    // ---- Instruments ----------------------------------------------------

    /// `AddInstrument(x)` followed by `AddInstrument(x)` is equivalent to
    /// one call (spec.md 8 property 5): this is an upsert, not an
    /// insert-or-fail.
    pub fn add_instrument(&self, req: NewInstrumentRequest) -> AppResult<Instrument> {
        let instrument: Instrument = req.into();
        instrument
            .check_invariants()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        self.metadata.save_instrument(&instrument)?;
        self.instruments
            .write()
            .insert(instrument.symbol.clone(), instrument.clone());
        Ok(instrument)
    }

    pub fn update_instrument(&self, symbol: &str, update: InstrumentUpdate) -> AppResult<Instrument> {
        let mut guard = self.instruments.write();
        let instrument = guard
            .get_mut(symbol)
            .ok_or_else(|| AppError::NotFound(format!("instrument {symbol}")))?;
        instrument.apply_update(update);
        instrument
            .check_invariants()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let snapshot = instrument.clone();
        self.metadata.save_instrument(&snapshot)?;
        Ok(snapshot)
    }

    pub fn get_instrument(&self, symbol: &str) -> Option<Instrument> {
        self.instruments.read().get(symbol).cloned()
    }

    pub fn list_instruments(&self) -> Vec<Instrument> {
        self.instruments.read().values().cloned().collect()
    }

    /// The HTTP surface stubs `DELETE` with 501 (spec.md 9 open question);
    /// this method is the storage-level capability it would call if that
    /// policy were ever finalized, refusing while any subscription still
    /// references the symbol.
    pub fn delete_instrument(&self, symbol: &str) -> AppResult<()> {
        match self.metadata.delete_instrument(symbol) {
            Ok(true) => {
                self.instruments.write().remove(symbol);
                Ok(())
            }
            Ok(false) => Err(AppError::NotFound(format!("instrument {symbol}"))),
            Err(e) => Err(AppError::Conflict(e.to_string())),
        }
    }

    // ---- Subscriptions ----------------------------------------------------

    pub fn add_subscription(&self, req: NewSubscriptionRequest) -> AppResult<InstrumentSubscription> {
        if req.data_types.is_empty() {
            return Err(AppError::Validation("data_types must not be empty".to_string()));
        }
        {
            let existing = self.subscriptions.read();
            let conflict = existing.values().any(|s| {
                s.is_active
                    && s.symbol == req.symbol
                    && s.broker_id == req.broker_id
                    && s.data_types.iter().any(|dt| req.data_types.contains(dt))
            });
            if conflict {
                return Err(AppError::Conflict(format!(
                    "an active subscription already covers one of the requested data types for ({}, {})",
                    req.symbol, req.broker_id
                )));
            }
        }
        let sub = InstrumentSubscription::from_request(req);
        self.metadata.save_subscription(&sub)?;
        self.subscriptions.write().insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    pub fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> AppResult<InstrumentSubscription> {
        let snapshot = {
            let mut guard = self.subscriptions.write();
            let sub = guard
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
            sub.apply_update(update);
            sub.clone()
        };
        self.metadata.save_subscription(&snapshot)?;
        self.reconcile_broker(&snapshot.broker_id)?;
        Ok(snapshot)
    }

    pub fn remove_subscription(&self, id: &str) -> AppResult<()> {
        let broker_id = {
            let mut guard = self.subscriptions.write();
            let sub = guard
                .remove(id)
                .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
            sub.broker_id
        };
        self.metadata.delete_subscription(id)?;
        self.reconcile_broker(&broker_id)?;
        Ok(())
    }

    pub fn get_subscription(&self, id: &str) -> Option<InstrumentSubscription> {
        self.subscriptions.read().get(id).cloned()
    }

    pub fn list_subscriptions(&self) -> Vec<InstrumentSubscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    /// `StartTracking`/`StopTracking` are idempotent regardless of current
    /// state (spec.md 8 property 5).
    pub fn start_tracking(&self, id: &str) -> AppResult<()> {
        self.set_active(id, true)
    }

    pub fn stop_tracking(&self, id: &str) -> AppResult<()> {
        self.set_active(id, false)
    }

    fn set_active(&self, id: &str, active: bool) -> AppResult<()> {
        let broker_id = {
            let mut guard = self.subscriptions.write();
            let sub = guard
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
            sub.is_active = active;
            sub.updated_at = chrono::Utc::now();
            self.metadata.save_subscription(sub)?;
            sub.broker_id.clone()
        };
        self.reconcile_broker(&broker_id)
    }

    /// Computes the desired target set for one broker from all of its
    /// active subscriptions and issues the minimal `Subscribe`/`Unsubscribe`
    /// diff against the live session (spec.md 4.6). A no-op if the broker
    /// has no running session yet; the full set converges the next time
    /// `sync_with_brokers` runs after that broker is added.
    fn reconcile_broker(&self, broker_id: &str) -> AppResult<()> {
        let Some(session) = self.brokers.get(broker_id) else {
            return Ok(());
        };
        let desired = self.desired_targets(broker_id);
        let current = session.target_set();

        let to_add: Vec<SubscriptionTarget> =
            desired.difference(&current).cloned().collect();
        let to_remove: Vec<SubscriptionTarget> =
            current.difference(&desired).cloned().collect();

        if !to_add.is_empty() {
            self.brokers.subscribe(broker_id, to_add)?;
        }
        if !to_remove.is_empty() {
            self.brokers.unsubscribe(broker_id, &to_remove)?;
        }
        Ok(())
    }

    fn desired_targets(&self, broker_id: &str) -> HashSet<SubscriptionTarget> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| s.is_active && s.broker_id == broker_id)
            .flat_map(|s| {
                s.data_types.iter().map(|dt| SubscriptionTarget {
                    symbol: s.symbol.clone(),
                    data_type: *dt,
                })
            })
            .collect()
    }

    /// Full resync across every broker with at least one subscription,
    /// used after startup and after a broker reconnect (spec.md 4.6).
    /// Idempotent: running it twice in a row issues no further changes.
    pub fn sync_with_brokers(&self) -> AppResult<()> {
        let broker_ids: HashSet<String> = self
            .subscriptions
            .read()
            .values()
            .map(|s| s.broker_id.clone())
            .collect();
        for broker_id in broker_ids {
            self.reconcile_broker(&broker_id)?;
        }
        Ok(())
    }

    /// Earliest `start_date` across active subscriptions for
    /// `(symbol, broker_id)`; `None` means no subscription constrains the
    /// query, so the caller passes results through unfiltered (spec.md 4.7).
    pub fn earliest_start_date(
        &self,
        symbol: &str,
        broker_id: Option<&str>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| {
                s.symbol == symbol && broker_id.is_none_or(|b| s.broker_id == b)
            })
            .map(|s| s.start_date)
            .min()
    }
}

impl InstrumentLookup for SubscriptionRegistry {
    fn lookup(&self, _broker_id: &str, symbol: &str) -> Option<Instrument> {
        self.get_instrument(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokersConfig;
    use crate::models::{InstrumentKind, Market, SubscriptionSettings};
    use chrono::Utc;

    fn registry() -> SubscriptionRegistry {
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let brokers = Arc::new(BrokerManager::new(BrokersConfig::default()));
        SubscriptionRegistry::load(metadata, brokers).unwrap()
    }

    fn instrument_req() -> NewInstrumentRequest {
        NewInstrumentRequest {
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
            quantity_precision: 3,
        }
    }

    #[test]
    fn add_instrument_is_idempotent() {
        let reg = registry();
        reg.add_instrument(instrument_req()).unwrap();
        reg.add_instrument(instrument_req()).unwrap();
        assert_eq!(reg.list_instruments().len(), 1);
    }

    #[test]
    fn subscription_start_date_is_immutable_and_conflicts_are_rejected() {
        let reg = registry();
        reg.add_instrument(instrument_req()).unwrap();
        let sub = reg
            .add_subscription(NewSubscriptionRequest {
                symbol: "BTCUSDT".to_string(),
                broker_id: "binance".to_string(),
                kind: InstrumentKind::Spot,
                market: Market::Spot,
                data_types: vec![DataType::Ticker],
                start_date: Utc::now(),
                settings: SubscriptionSettings::default(),
            })
            .unwrap();

        let conflict = reg.add_subscription(NewSubscriptionRequest {
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            data_types: vec![DataType::Ticker],
            start_date: Utc::now(),
            settings: SubscriptionSettings::default(),
        });
        assert!(conflict.is_err());

        reg.start_tracking(&sub.id).unwrap();
        let updated = reg.get_subscription(&sub.id).unwrap();
        assert!(updated.is_active);
        assert_eq!(updated.start_date, sub.start_date);
    }

    #[test]
    fn earliest_start_date_picks_the_minimum() {
        let reg = registry();
        reg.add_instrument(instrument_req()).unwrap();
        let early = Utc::now() - chrono::Duration::days(10);
        let late = Utc::now();
        reg.add_subscription(NewSubscriptionRequest {
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            data_types: vec![DataType::Ticker],
            start_date: late,
            settings: SubscriptionSettings::default(),
        })
        .unwrap();
        reg.add_subscription(NewSubscriptionRequest {
            symbol: "BTCUSDT".to_string(),
            broker_id: "kraken".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            data_types: vec![DataType::Ticker],
            start_date: early,
            settings: SubscriptionSettings::default(),
        })
        .unwrap();
        assert_eq!(reg.earliest_start_date("BTCUSDT", None), Some(early));
    }
}
