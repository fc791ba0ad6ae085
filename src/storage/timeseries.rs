//! Time-series store (spec.md 4.5): tickers, candles, order books.
//! Append-optimized; batch writes go through one transaction per call,
//! the same pattern as `backtest_v2::l2_storage::L2Storage::store_snapshot`
//! but batched instead of one row at a time, since the pipeline already
//! accumulates records before flushing. Each table carries a `UNIQUE`
//! index over its full column tuple and writes use `INSERT OR IGNORE`,
//! so submitting the exact same sample twice collapses to one row
//! (spec.md 4.5, 102) while a same-key record that differs in even one
//! column (a later price correction, say) is still inserted.

use super::migrations::{self, Migration};
use crate::models::{Candle, Market, OrderBook, OrderBookLevel, Ticker, Timeframe};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_timeseries_tables",
    up_sql: r#"
        CREATE TABLE tickers (
            symbol TEXT NOT NULL,
            broker_id TEXT NOT NULL,
            market TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            price REAL NOT NULL,
            volume REAL NOT NULL,
            bid_price REAL NOT NULL,
            ask_price REAL NOT NULL,
            change REAL NOT NULL,
            change_percent REAL NOT NULL,
            high_24h REAL NOT NULL,
            low_24h REAL NOT NULL,
            volume_24h REAL NOT NULL,
            open_interest REAL
        );
        CREATE INDEX idx_tickers_symbol_broker_ts ON tickers(symbol, broker_id, timestamp);
        CREATE UNIQUE INDEX uq_tickers_exact ON tickers(
            symbol, broker_id, market, timestamp, price, volume,
            bid_price, ask_price, change, change_percent,
            high_24h, low_24h, volume_24h, open_interest
        );

        CREATE TABLE candles (
            symbol TEXT NOT NULL,
            broker_id TEXT NOT NULL,
            market TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            trades INTEGER NOT NULL,
            quote_volume REAL NOT NULL
        );
        CREATE INDEX idx_candles_symbol_broker_tf_ts
            ON candles(symbol, broker_id, timeframe, timestamp);
        CREATE UNIQUE INDEX uq_candles_exact ON candles(
            symbol, broker_id, market, timeframe, timestamp,
            open, high, low, close, volume, trades, quote_volume
        );

        CREATE TABLE orderbooks (
            symbol TEXT NOT NULL,
            broker_id TEXT NOT NULL,
            market TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            bids_json TEXT NOT NULL,
            asks_json TEXT NOT NULL
        );
        CREATE INDEX idx_orderbooks_symbol_broker_ts
            ON orderbooks(symbol, broker_id, timestamp);
        CREATE UNIQUE INDEX uq_orderbooks_exact ON orderbooks(
            symbol, broker_id, market, timestamp, bids_json, asks_json
        );
    "#,
    down_sql: r#"
        DROP TABLE IF EXISTS tickers;
        DROP TABLE IF EXISTS candles;
        DROP TABLE IF EXISTS orderbooks;
    "#,
}];

/// Query parameters shared by all three `Get*` operations (spec.md 4.5).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub symbols: Vec<String>,
    pub broker_ids: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeframe: Option<Timeframe>,
    pub limit: usize,
}

pub struct TimeSeriesStore {
    conn: Mutex<Connection>,
}

fn market_to_str(m: Market) -> &'static str {
    match m {
        Market::Spot => "spot",
        Market::Futures => "futures",
        Market::Stock => "stock",
    }
}

fn market_from_str(s: &str) -> Market {
    match s {
        "futures" => Market::Futures,
        "stock" => Market::Stock,
        _ => Market::Spot,
    }
}

impl TimeSeriesStore {
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

    /// Deletes the oldest `limit` rows in `table` strictly older than
    /// `cutoff`, returning the number of rows removed. Used by the
    /// retention worker (C9) to bound each deletion transaction.
    fn vacuum_chunk(&self, table: &str, cutoff: DateTime<Utc>, limit: u64) -> anyhow::Result<u64> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            &format!(
                "DELETE FROM {table} WHERE rowid IN (
                    SELECT rowid FROM {table} WHERE timestamp < ?1 LIMIT ?2
                )"
            ),
            params![cutoff.to_rfc3339(), limit as i64],
        )?;
        Ok(affected as u64)
    }

    pub fn vacuum_tickers(&self, cutoff: DateTime<Utc>, limit: u64) -> anyhow::Result<u64> {
        self.vacuum_chunk("tickers", cutoff, limit)
    }
    pub fn vacuum_candles(&self, cutoff: DateTime<Utc>, limit: u64) -> anyhow::Result<u64> {
        self.vacuum_chunk("candles", cutoff, limit)
    }
    pub fn vacuum_orderbooks(&self, cutoff: DateTime<Utc>, limit: u64) -> anyhow::Result<u64> {
        self.vacuum_chunk("orderbooks", cutoff, limit)
    }

    /// Approximate on-disk size in bytes, used against `max_storage_size`.
    pub fn storage_size_bytes(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock();
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok((page_count * page_size).max(0) as u64)
    }

    pub fn save_tickers(&self, batch: &[Ticker]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO tickers (
                    symbol, broker_id, market, timestamp, price, volume,
                    bid_price, ask_price, change, change_percent,
                    high_24h, low_24h, volume_24h, open_interest
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            )?;
            for t in batch {
                stmt.execute(params![
                    t.envelope.symbol,
                    t.envelope.broker_id,
                    market_to_str(t.envelope.market),
                    t.envelope.timestamp.to_rfc3339(),
                    t.price,
                    t.volume,
                    t.bid_price,
                    t.ask_price,
                    t.change,
                    t.change_percent,
                    t.high_24h,
                    t.low_24h,
                    t.volume_24h,
                    t.open_interest,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn save_candles(&self, batch: &[Candle]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO candles (
                    symbol, broker_id, market, timeframe, timestamp,
                    open, high, low, close, volume, trades, quote_volume
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            )?;
            for c in batch {
                stmt.execute(params![
                    c.envelope.symbol,
                    c.envelope.broker_id,
                    market_to_str(c.envelope.market),
                    c.timeframe.as_str(),
                    c.envelope.timestamp.to_rfc3339(),
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume,
                    c.trades,
                    c.quote_volume,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn save_orderbooks(&self, batch: &[OrderBook]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO orderbooks (
                    symbol, broker_id, market, timestamp, bids_json, asks_json
                ) VALUES (?1,?2,?3,?4,?5,?6)",
            )?;
            for ob in batch {
                stmt.execute(params![
                    ob.envelope.symbol,
                    ob.envelope.broker_id,
                    market_to_str(ob.envelope.market),
                    ob.envelope.timestamp.to_rfc3339(),
                    serde_json::to_string(&ob.bids)?,
                    serde_json::to_string(&ob.asks)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_common_filter(filter: &QueryFilter, sql: &mut String, params: &mut Vec<String>) {
        if !filter.symbols.is_empty() {
            let placeholders = filter.symbols.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND symbol IN ({placeholders})"));
            params.extend(filter.symbols.iter().cloned());
        }
        if !filter.broker_ids.is_empty() {
            let placeholders = filter
                .broker_ids
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND broker_id IN ({placeholders})"));
            params.extend(filter.broker_ids.iter().cloned());
        }
        if let Some(start) = filter.start_time {
            sql.push_str(" AND timestamp >= ?");
            params.push(start.to_rfc3339());
        }
        if let Some(end) = filter.end_time {
            sql.push_str(" AND timestamp <= ?");
            params.push(end.to_rfc3339());
        }
    }

    pub fn get_tickers(&self, filter: &QueryFilter) -> anyhow::Result<Vec<Ticker>> {
        let conn = self.conn.lock();
        let mut sql = "SELECT * FROM tickers WHERE 1=1".to_string();
        let mut bind = Vec::new();
        Self::apply_common_filter(filter, &mut sql, &mut bind);
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        bind.push(filter.limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> =
            bind.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let market: String = row.get("market")?;
            let ts: String = row.get("timestamp")?;
            Ok(Ticker {
                envelope: crate::models::SampleEnvelope {
                    symbol: row.get("symbol")?,
                    broker_id: row.get("broker_id")?,
                    market: market_from_str(&market),
                    kind: crate::models::InstrumentKind::Spot,
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .unwrap()
                        .with_timezone(&Utc),
                },
                price: row.get("price")?,
                volume: row.get("volume")?,
                bid_price: row.get("bid_price")?,
                ask_price: row.get("ask_price")?,
                change: row.get("change")?,
                change_percent: row.get("change_percent")?,
                high_24h: row.get("high_24h")?,
                low_24h: row.get("low_24h")?,
                volume_24h: row.get("volume_24h")?,
                open_interest: row.get("open_interest")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_candles(&self, filter: &QueryFilter) -> anyhow::Result<Vec<Candle>> {
        let conn = self.conn.lock();
        let mut sql = "SELECT * FROM candles WHERE 1=1".to_string();
        let mut bind = Vec::new();
        Self::apply_common_filter(filter, &mut sql, &mut bind);
        if let Some(tf) = filter.timeframe {
            sql.push_str(" AND timeframe = ?");
            bind.push(tf.as_str().to_string());
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        bind.push(filter.limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> =
            bind.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let market: String = row.get("market")?;
            let ts: String = row.get("timestamp")?;
            let tf: String = row.get("timeframe")?;
            Ok(Candle {
                envelope: crate::models::SampleEnvelope {
                    symbol: row.get("symbol")?,
                    broker_id: row.get("broker_id")?,
                    market: market_from_str(&market),
                    kind: crate::models::InstrumentKind::Spot,
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .unwrap()
                        .with_timezone(&Utc),
                },
                timeframe: Timeframe::parse(&tf).unwrap_or(Timeframe::M1),
                open: row.get("open")?,
                high: row.get("high")?,
                low: row.get("low")?,
                close: row.get("close")?,
                volume: row.get("volume")?,
                trades: row.get("trades")?,
                quote_volume: row.get("quote_volume")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Latest order book snapshot per matching `(symbol, broker_id)`,
    /// truncated to `depth` levels per side.
    pub fn get_latest_orderbook(
        &self,
        symbol: &str,
        broker_id: Option<&str>,
        depth: usize,
    ) -> anyhow::Result<Option<OrderBook>> {
        let conn = self.conn.lock();
        let (sql, param_vals): (String, Vec<String>) = match broker_id {
            Some(b) => (
                "SELECT * FROM orderbooks WHERE symbol = ?1 AND broker_id = ?2 ORDER BY timestamp DESC LIMIT 1"
                    .to_string(),
                vec![symbol.to_string(), b.to_string()],
            ),
            None => (
                "SELECT * FROM orderbooks WHERE symbol = ?1 ORDER BY timestamp DESC LIMIT 1"
                    .to_string(),
                vec![symbol.to_string()],
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> =
            param_vals.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let result = stmt
            .query_row(params_ref.as_slice(), |row| {
                let market: String = row.get("market")?;
                let ts: String = row.get("timestamp")?;
                let bids_json: String = row.get("bids_json")?;
                let asks_json: String = row.get("asks_json")?;
                Ok((
                    crate::models::SampleEnvelope {
                        symbol: row.get::<_, String>("symbol")?,
                        broker_id: row.get::<_, String>("broker_id")?,
                        market: market_from_str(&market),
                        kind: crate::models::InstrumentKind::Spot,
                        timestamp: DateTime::parse_from_rfc3339(&ts)
                            .unwrap()
                            .with_timezone(&Utc),
                    },
                    bids_json,
                    asks_json,
                ))
            })
            .optional()?;

        let Some((envelope, bids_json, asks_json)) = result else {
            return Ok(None);
        };
        let mut bids: Vec<OrderBookLevel> = serde_json::from_str(&bids_json)?;
        let mut asks: Vec<OrderBookLevel> = serde_json::from_str(&asks_json)?;
        bids.truncate(depth);
        asks.truncate(depth);
        Ok(Some(OrderBook { envelope, bids, asks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentKind, SampleEnvelope};

    fn ticker(symbol: &str, ts: DateTime<Utc>, price: f64) -> Ticker {
        Ticker {
            envelope: SampleEnvelope {
                symbol: symbol.to_string(),
                broker_id: "binance".to_string(),
                market: Market::Spot,
                kind: InstrumentKind::Spot,
                timestamp: ts,
            },
            price,
            volume: 1.0,
            bid_price: price - 1.0,
            ask_price: price + 1.0,
            change: 0.0,
            change_percent: 0.0,
            high_24h: price,
            low_24h: price,
            volume_24h: 0.0,
            open_interest: None,
        }
    }

    #[test]
    fn save_and_query_tickers_by_time_range() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let t1 = ticker("BTCUSDT", Utc::now() - chrono::Duration::hours(2), 50000.0);
        let t2 = ticker("BTCUSDT", Utc::now(), 50100.0);
        store.save_tickers(&[t1, t2]).unwrap();

        let filter = QueryFilter {
            symbols: vec!["BTCUSDT".to_string()],
            start_time: Some(Utc::now() - chrono::Duration::hours(1)),
            limit: 100,
            ..Default::default()
        };
        let rows = store.get_tickers(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 50100.0);
    }

    #[test]
    fn exact_duplicate_ticker_collapses_to_one_row() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let ts = Utc::now();
        let t = ticker("BTCUSDT", ts, 50000.0);
        store.save_tickers(&[t.clone(), t.clone()]).unwrap();
        store.save_tickers(&[t]).unwrap();

        let rows = store
            .get_tickers(&QueryFilter {
                symbols: vec!["BTCUSDT".to_string()],
                limit: 100,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn same_key_different_price_is_kept_as_a_separate_row() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let ts = Utc::now();
        let a = ticker("BTCUSDT", ts, 50000.0);
        let b = ticker("BTCUSDT", ts, 50001.0);
        store.save_tickers(&[a, b]).unwrap();

        let rows = store
            .get_tickers(&QueryFilter {
                symbols: vec!["BTCUSDT".to_string()],
                limit: 100,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn vacuum_removes_only_rows_older_than_cutoff() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let old = ticker("BTCUSDT", Utc::now() - chrono::Duration::hours(800), 1.0);
        let recent = ticker("BTCUSDT", Utc::now(), 2.0);
        store.save_tickers(&[old, recent]).unwrap();

        let removed = store
            .vacuum_tickers(Utc::now() - chrono::Duration::hours(720), 1000)
            .unwrap();
        assert_eq!(removed, 1);
        let remaining = store
            .get_tickers(&QueryFilter {
                limit: 100,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].price, 2.0);
    }

    #[test]
    fn latest_orderbook_truncates_to_depth() {
        let store = TimeSeriesStore::open_in_memory().unwrap();
        let ob = OrderBook {
            envelope: SampleEnvelope {
                symbol: "BTCUSDT".to_string(),
                broker_id: "binance".to_string(),
                market: Market::Spot,
                kind: InstrumentKind::Spot,
                timestamp: Utc::now(),
            },
            bids: vec![
                OrderBookLevel { price: 100.0, quantity: 1.0 },
                OrderBookLevel { price: 99.0, quantity: 1.0 },
                OrderBookLevel { price: 98.0, quantity: 1.0 },
            ],
            asks: vec![OrderBookLevel { price: 101.0, quantity: 1.0 }],
        };
        store.save_orderbooks(&[ob]).unwrap();
        let fetched = store
            .get_latest_orderbook("BTCUSDT", None, 2)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.bids.len(), 2);
    }
}
