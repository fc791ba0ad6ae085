//! Data Validator (C4): a pure, side-effect-free, deterministic function
//! from a record plus its instrument context to `Ok` or a `RejectReason`.

use crate::error::RejectReason;
use crate::models::{Candle, Instrument, OrderBook, Ticker};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub instrument: Option<&'a Instrument>,
    pub now: DateTime<Utc>,
    pub retention_horizon: chrono::Duration,
    pub clock_skew_tolerance: chrono::Duration,
}

fn decimal_scale(value: f64) -> u32 {
    // Count digits after the decimal point once trailing float noise is
    // rounded away at 9 significant decimals, which is enough headroom
    // for any price/quantity precision this service declares (<= 8).
    let rounded = (value * 1e9).round() / 1e9;
    let s = format!("{rounded:.9}");
    let Some(frac) = s.split('.').nth(1) else {
        return 0;
    };
    frac.trim_end_matches('0').len() as u32
}

fn check_timestamp(ctx: &ValidationContext, ts: DateTime<Utc>) -> Result<(), RejectReason> {
    if ts < ctx.now - ctx.retention_horizon || ts > ctx.now + ctx.clock_skew_tolerance {
        return Err(RejectReason::Stale);
    }
    Ok(())
}

fn check_instrument<'a>(
    ctx: &ValidationContext<'a>,
) -> Result<&'a Instrument, RejectReason> {
    ctx.instrument.ok_or(RejectReason::UnknownSymbol)
}

/// Validate a ticker record. Pure function: same inputs always yield the
/// same result.
pub fn validate_ticker(ticker: &Ticker, ctx: &ValidationContext) -> Result<(), RejectReason> {
    check_timestamp(ctx, ticker.envelope.timestamp)?;
    let instrument = check_instrument(ctx)?;

    if ticker.price < 0.0 || ticker.bid_price < 0.0 || ticker.ask_price < 0.0 {
        return Err(RejectReason::SchemaInvalid);
    }
    if ticker.price < instrument.min_price || ticker.price > instrument.max_price {
        return Err(RejectReason::OutOfBounds);
    }
    if decimal_scale(ticker.price) > instrument.price_precision {
        return Err(RejectReason::PrecisionViolation);
    }
    if ticker.volume < 0.0 {
        return Err(RejectReason::SchemaInvalid);
    }
    if decimal_scale(ticker.volume) > instrument.quantity_precision {
        return Err(RejectReason::PrecisionViolation);
    }
    Ok(())
}

/// Validate a candle record, including the OHLC invariant from spec.md 3.
pub fn validate_candle(candle: &Candle, ctx: &ValidationContext) -> Result<(), RejectReason> {
    check_timestamp(ctx, candle.envelope.timestamp)?;
    let instrument = check_instrument(ctx)?;

    if candle.check_invariants().is_err() {
        return Err(RejectReason::SchemaInvalid);
    }
    for price in [candle.open, candle.high, candle.low, candle.close] {
        if price < instrument.min_price || price > instrument.max_price {
            return Err(RejectReason::OutOfBounds);
        }
        if decimal_scale(price) > instrument.price_precision {
            return Err(RejectReason::PrecisionViolation);
        }
    }
    Ok(())
}

/// Validate an order book snapshot, including the crossed-book and
/// monotonicity invariants from spec.md 3.
pub fn validate_orderbook(book: &OrderBook, ctx: &ValidationContext) -> Result<(), RejectReason> {
    check_timestamp(ctx, book.envelope.timestamp)?;
    let instrument = check_instrument(ctx)?;

    if book.check_invariants().is_err() {
        return Err(RejectReason::SchemaInvalid);
    }
    for level in book.bids.iter().chain(book.asks.iter()) {
        if level.price < instrument.min_price || level.price > instrument.max_price {
            return Err(RejectReason::OutOfBounds);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentKind, Market, SampleEnvelope};

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

    fn ctx(instrument: &Instrument) -> ValidationContext {
        ValidationContext {
            instrument: Some(instrument),
            now: Utc::now(),
            retention_horizon: chrono::Duration::days(30),
            clock_skew_tolerance: chrono::Duration::seconds(5),
        }
    }

    fn envelope(ts: DateTime<Utc>) -> SampleEnvelope {
        SampleEnvelope {
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            market: Market::Spot,
            kind: InstrumentKind::Spot,
            timestamp: ts,
        }
    }

    #[test]
    fn accepts_well_formed_ticker() {
        let instrument = instrument();
        let ticker = Ticker {
            envelope: envelope(Utc::now()),
            price: 50100.10,
            volume: 1.5,
            bid_price: 50100.0,
            ask_price: 50100.2,
            change: 1.0,
            change_percent: 0.01,
            high_24h: 51000.0,
            low_24h: 49000.0,
            volume_24h: 1000.0,
            open_interest: None,
        };
        assert!(validate_ticker(&ticker, &ctx(&instrument)).is_ok());
    }

    #[test]
    fn rejects_precision_violation() {
        let instrument = instrument();
        let mut ticker = Ticker {
            envelope: envelope(Utc::now()),
            price: 100.123,
            volume: 1.0,
            bid_price: 100.0,
            ask_price: 100.2,
            change: 0.0,
            change_percent: 0.0,
            high_24h: 100.0,
            low_24h: 100.0,
            volume_24h: 0.0,
            open_interest: None,
        };
        assert_eq!(
            validate_ticker(&ticker, &ctx(&instrument)),
            Err(RejectReason::PrecisionViolation)
        );
        ticker.price = 100.12;
        assert!(validate_ticker(&ticker, &ctx(&instrument)).is_ok());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let instrument = instrument();
        let ticker = Ticker {
            envelope: envelope(Utc::now() - chrono::Duration::days(31)),
            price: 100.0,
            volume: 1.0,
            bid_price: 99.0,
            ask_price: 101.0,
            change: 0.0,
            change_percent: 0.0,
            high_24h: 100.0,
            low_24h: 100.0,
            volume_24h: 0.0,
            open_interest: None,
        };
        assert_eq!(
            validate_ticker(&ticker, &ctx(&instrument)),
            Err(RejectReason::Stale)
        );
    }

    #[test]
    fn rejects_unknown_symbol() {
        let ticker = Ticker {
            envelope: envelope(Utc::now()),
            price: 100.0,
            volume: 1.0,
            bid_price: 99.0,
            ask_price: 101.0,
            change: 0.0,
            change_percent: 0.0,
            high_24h: 100.0,
            low_24h: 100.0,
            volume_24h: 0.0,
            open_interest: None,
        };
        let context = ValidationContext {
            instrument: None,
            now: Utc::now(),
            retention_horizon: chrono::Duration::days(30),
            clock_skew_tolerance: chrono::Duration::seconds(5),
        };
        assert_eq!(
            validate_ticker(&ticker, &context),
            Err(RejectReason::UnknownSymbol)
        );
    }

    #[test]
    fn rejects_out_of_bounds_price() {
        let instrument = instrument();
        let ticker = Ticker {
            envelope: envelope(Utc::now()),
            price: 2_000_000.0,
            volume: 1.0,
            bid_price: 99.0,
            ask_price: 101.0,
            change: 0.0,
            change_percent: 0.0,
            high_24h: 100.0,
            low_24h: 100.0,
            volume_24h: 0.0,
            open_interest: None,
        };
        assert_eq!(
            validate_ticker(&ticker, &ctx(&instrument)),
            Err(RejectReason::OutOfBounds)
        );
    }

    #[test]
    fn rejects_invalid_candle_invariant() {
        let instrument = instrument();
        let candle = Candle {
            envelope: envelope(Utc::now()),
            timeframe: crate::models::Timeframe::M1,
            open: 100.0,
            high: 99.0,
            low: 98.0,
            close: 100.5,
            volume: 1.0,
            trades: 1,
            quote_volume: 100.0,
        };
        assert_eq!(
            validate_candle(&candle, &ctx(&instrument)),
            Err(RejectReason::SchemaInvalid)
        );
    }
}
