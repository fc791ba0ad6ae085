//! Metadata store (spec.md 4.5): instruments, subscriptions, broker configs.
//! Relational, strongly-consistent, guarded by the same
//! `parking_lot::Mutex<Connection>` idiom the teacher uses in
//! `vault/vault_db.rs` and `backtest_v2/l2_storage.rs` for its embedded
//! SQLite stores.

use super::migrations::{self, Migration};
use crate::models::{
    DataType, Instrument, InstrumentKind, InstrumentSubscription, Market, SubscriptionSettings,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_metadata_tables",
    up_sql: r#"
        CREATE TABLE instruments (
            symbol TEXT PRIMARY KEY,
            base_asset TEXT NOT NULL,
            quote_asset TEXT NOT NULL,
            kind TEXT NOT NULL,
            market TEXT NOT NULL,
            is_active INTEGER NOT NULL,
            min_price REAL NOT NULL,
            max_price REAL NOT NULL,
            min_quantity REAL NOT NULL,
            max_quantity REAL NOT NULL,
            price_precision INTEGER NOT NULL,
            quantity_precision INTEGER NOT NULL
        );

        CREATE TABLE subscriptions (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            broker_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            market TEXT NOT NULL,
            data_types TEXT NOT NULL,
            start_date TEXT NOT NULL,
            settings TEXT NOT NULL,
            is_active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX idx_subscriptions_symbol_broker
            ON subscriptions(symbol, broker_id);

        CREATE TABLE broker_config (
            broker_id TEXT PRIMARY KEY,
            adapter_kind TEXT NOT NULL,
            endpoint TEXT,
            api_key TEXT,
            api_secret TEXT,
            max_symbols_per_connection INTEGER NOT NULL,
            rate_limit_per_sec INTEGER
        );

        CREATE TABLE system_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    "#,
    down_sql: r#"
        DROP TABLE IF EXISTS instruments;
        DROP TABLE IF EXISTS subscriptions;
        DROP TABLE IF EXISTS broker_config;
        DROP TABLE IF EXISTS system_config;
    "#,
}];

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

fn kind_to_str(kind: InstrumentKind) -> &'static str {
    match kind {
        InstrumentKind::Spot => "spot",
        InstrumentKind::Futures => "futures",
        InstrumentKind::Stock => "stock",
        InstrumentKind::Etf => "etf",
        InstrumentKind::Bond => "bond",
    }
}

fn kind_from_str(s: &str) -> anyhow::Result<InstrumentKind> {
    Ok(match s {
        "spot" => InstrumentKind::Spot,
        "futures" => InstrumentKind::Futures,
        "stock" => InstrumentKind::Stock,
        "etf" => InstrumentKind::Etf,
        "bond" => InstrumentKind::Bond,
        other => anyhow::bail!("unknown instrument kind {other}"),
    })
}

fn market_to_str(market: Market) -> &'static str {
    match market {
        Market::Spot => "spot",
        Market::Futures => "futures",
        Market::Stock => "stock",
    }
}

fn market_from_str(s: &str) -> anyhow::Result<Market> {
    Ok(match s {
        "spot" => Market::Spot,
        "futures" => Market::Futures,
        "stock" => Market::Stock,
        other => anyhow::bail!("unknown market {other}"),
    })
}

fn instrument_from_row(row: &rusqlite::Row) -> rusqlite::Result<Instrument> {
    let kind: String = row.get("kind")?;
    let market: String = row.get("market")?;
    Ok(Instrument {
        symbol: row.get("symbol")?,
        base_asset: row.get("base_asset")?,
        quote_asset: row.get("quote_asset")?,
        kind: kind_from_str(&kind).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        market: market_from_str(&market).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        min_price: row.get("min_price")?,
        max_price: row.get("max_price")?,
        min_quantity: row.get("min_quantity")?,
        max_quantity: row.get("max_quantity")?,
        price_precision: row.get("price_precision")?,
        quantity_precision: row.get("quantity_precision")?,
    })
}

fn subscription_from_row(row: &rusqlite::Row) -> anyhow::Result<InstrumentSubscription> {
    let kind: String = row.get("kind")?;
    let market: String = row.get("market")?;
    let data_types: String = row.get("data_types")?;
    let settings: String = row.get("settings")?;
    let start_date: String = row.get("start_date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(InstrumentSubscription {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        broker_id: row.get("broker_id")?,
        kind: kind_from_str(&kind)?,
        market: market_from_str(&market)?,
        data_types: serde_json::from_str::<Vec<DataType>>(&data_types)?,
        start_date: DateTime::parse_from_rfc3339(&start_date)?.with_timezone(&Utc),
        settings: serde_json::from_str::<SubscriptionSettings>(&settings)?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

impl MetadataStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        migrations::run(&mut conn, MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run(&mut conn, MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn save_instrument(&self, instrument: &Instrument) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO instruments (
                symbol, base_asset, quote_asset, kind, market, is_active,
                min_price, max_price, min_quantity, max_quantity,
                price_precision, quantity_precision
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
            ON CONFLICT(symbol) DO UPDATE SET
                base_asset = excluded.base_asset,
                quote_asset = excluded.quote_asset,
                kind = excluded.kind,
                market = excluded.market,
                is_active = excluded.is_active,
                min_price = excluded.min_price,
                max_price = excluded.max_price,
                min_quantity = excluded.min_quantity,
                max_quantity = excluded.max_quantity,
                price_precision = excluded.price_precision,
                quantity_precision = excluded.quantity_precision",
            params![
                instrument.symbol,
                instrument.base_asset,
                instrument.quote_asset,
                kind_to_str(instrument.kind),
                market_to_str(instrument.market),
                instrument.is_active as i64,
                instrument.min_price,
                instrument.max_price,
                instrument.min_quantity,
                instrument.max_quantity,
                instrument.price_precision,
                instrument.quantity_precision,
            ],
        )?;
        Ok(())
    }

    pub fn get_instrument(&self, symbol: &str) -> anyhow::Result<Option<Instrument>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT * FROM instruments WHERE symbol = ?1",
                params![symbol],
                instrument_from_row,
            )
            .optional()?;
        Ok(result)
    }

    pub fn list_instruments(&self) -> anyhow::Result<Vec<Instrument>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM instruments ORDER BY symbol")?;
        let rows = stmt
            .query_map([], instrument_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes the instrument row. Whether this is reachable through the
    /// HTTP surface is a separate policy decision (spec.md 9 open question);
    /// the storage manager itself supports it and refuses when any
    /// subscription still references the symbol.
    pub fn delete_instrument(&self, symbol: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let referenced: i64 = conn.query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        if referenced > 0 {
            anyhow::bail!("instrument {symbol} is referenced by {referenced} subscription(s)");
        }
        let affected = conn.execute("DELETE FROM instruments WHERE symbol = ?1", params![symbol])?;
        Ok(affected > 0)
    }

    pub fn save_subscription(&self, sub: &InstrumentSubscription) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO subscriptions (
                id, symbol, broker_id, kind, market, data_types,
                start_date, settings, is_active, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(id) DO UPDATE SET
                data_types = excluded.data_types,
                settings = excluded.settings,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
            params![
                sub.id,
                sub.symbol,
                sub.broker_id,
                kind_to_str(sub.kind),
                market_to_str(sub.market),
                serde_json::to_string(&sub.data_types)?,
                sub.start_date.to_rfc3339(),
                serde_json::to_string(&sub.settings)?,
                sub.is_active as i64,
                sub.created_at.to_rfc3339(),
                sub.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_subscription(&self, id: &str) -> anyhow::Result<Option<InstrumentSubscription>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM subscriptions WHERE id = ?1")?;
        let sub = stmt
            .query_row(params![id], |row| {
                subscription_from_row(row).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })
            })
            .optional()?;
        Ok(sub)
    }

    pub fn list_subscriptions(&self) -> anyhow::Result<Vec<InstrumentSubscription>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM subscriptions ORDER BY created_at")?;
        let rows = stmt.query_map([], |row| {
            subscription_from_row(row).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_subscription(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionSettings;

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
            quantity_precision: 3,
        }
    }

    #[test]
    fn save_and_get_instrument_roundtrips() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.save_instrument(&instrument()).unwrap();
        let fetched = store.get_instrument("BTCUSDT").unwrap().unwrap();
        assert_eq!(fetched.symbol, "BTCUSDT");
        assert_eq!(fetched.price_precision, 2);
    }

    #[test]
    fn delete_instrument_refuses_when_referenced() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.save_instrument(&instrument()).unwrap();
        let sub = InstrumentSubscription {
            id: "sub-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            data_types: vec![DataType::Ticker],
            start_date: Utc::now(),
            settings: SubscriptionSettings::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.save_subscription(&sub).unwrap();
        assert!(store.delete_instrument("BTCUSDT").is_err());
        store.delete_subscription("sub-1").unwrap();
        assert!(store.delete_instrument("BTCUSDT").unwrap());
    }

    #[test]
    fn subscription_roundtrip_preserves_data_types() {
        let store = MetadataStore::open_in_memory().unwrap();
        let sub = InstrumentSubscription {
            id: "sub-2".to_string(),
            symbol: "ETHUSDT".to_string(),
            broker_id: "binance".to_string(),
            kind: InstrumentKind::Spot,
            market: Market::Spot,
            data_types: vec![DataType::Ticker, DataType::Candle],
            start_date: Utc::now(),
            settings: SubscriptionSettings::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.save_subscription(&sub).unwrap();
        let fetched = store.get_subscription("sub-2").unwrap().unwrap();
        assert_eq!(fetched.data_types.len(), 2);
    }
}
