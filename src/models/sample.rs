use super::{InstrumentKind, Market};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "1s" => Self::S1,
            "1m" => Self::M1,
            "3m" => Self::M3,
            "5m" => Self::M5,
            "15m" => Self::M15,
            "30m" => Self::M30,
            "1h" => Self::H1,
            "2h" => Self::H2,
            "4h" => Self::H4,
            "6h" => Self::H6,
            "8h" => Self::H8,
            "12h" => Self::H12,
            "1d" => Self::D1,
            "3d" => Self::D3,
            "1w" => Self::W1,
            "1M" => Self::Mo1,
            _ => return None,
        })
    }
}

/// Common envelope shared by the three sample variants (spec.md 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleEnvelope {
    pub symbol: String,
    pub broker_id: String,
    pub market: Market,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    #[serde(flatten)]
    pub envelope: SampleEnvelope,
    pub price: f64,
    pub volume: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    #[serde(default)]
    pub open_interest: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    #[serde(flatten)]
    pub envelope: SampleEnvelope,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u64,
    pub quote_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleInvariantError {
    LowAboveBody,
    HighBelowBody,
    NegativeVolume,
}

impl std::fmt::Display for CandleInvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowAboveBody => write!(f, "low must be <= min(open, close)"),
            Self::HighBelowBody => write!(f, "high must be >= max(open, close)"),
            Self::NegativeVolume => write!(f, "volume must be >= 0"),
        }
    }
}
impl std::error::Error for CandleInvariantError {}

impl Candle {
    /// `low <= min(open,close) <= max(open,close) <= high`, `volume >= 0`.
    pub fn check_invariants(&self) -> Result<(), CandleInvariantError> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low {
            return Err(CandleInvariantError::LowAboveBody);
        }
        if self.high < body_high {
            return Err(CandleInvariantError::HighBelowBody);
        }
        if self.volume < 0.0 {
            return Err(CandleInvariantError::NegativeVolume);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(flatten)]
    pub envelope: SampleEnvelope,
    /// Descending price.
    pub bids: Vec<OrderBookLevel>,
    /// Ascending price.
    pub asks: Vec<OrderBookLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBookInvariantError {
    BidsNotStrictlyDescending,
    AsksNotStrictlyAscending,
    CrossedBook,
}

impl std::fmt::Display for OrderBookInvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BidsNotStrictlyDescending => write!(f, "bids must be strictly descending"),
            Self::AsksNotStrictlyAscending => write!(f, "asks must be strictly ascending"),
            Self::CrossedBook => write!(f, "best bid must be < best ask"),
        }
    }
}
impl std::error::Error for OrderBookInvariantError {}

impl OrderBook {
    pub fn check_invariants(&self) -> Result<(), OrderBookInvariantError> {
        for pair in self.bids.windows(2) {
            if pair[0].price <= pair[1].price {
                return Err(OrderBookInvariantError::BidsNotStrictlyDescending);
            }
        }
        for pair in self.asks.windows(2) {
            if pair[0].price >= pair[1].price {
                return Err(OrderBookInvariantError::AsksNotStrictlyAscending);
            }
        }
        if let (Some(best_bid), Some(best_ask)) = (self.bids.first(), self.asks.first()) {
            if best_bid.price >= best_ask.price {
                return Err(OrderBookInvariantError::CrossedBook);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope() -> SampleEnvelope {
        SampleEnvelope {
            symbol: "BTCUSDT".to_string(),
            broker_id: "binance".to_string(),
            market: Market::Spot,
            kind: InstrumentKind::Spot,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn candle_invariants_hold_for_well_formed_candle() {
        let candle = Candle {
            envelope: envelope(),
            timeframe: Timeframe::M1,
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 10.0,
            trades: 5,
            quote_volume: 1000.0,
        };
        assert!(candle.check_invariants().is_ok());
    }

    #[test]
    fn candle_with_low_above_body_is_rejected() {
        let mut candle = Candle {
            envelope: envelope(),
            timeframe: Timeframe::M1,
            open: 100.0,
            high: 110.0,
            low: 101.0,
            close: 105.0,
            volume: 10.0,
            trades: 5,
            quote_volume: 1000.0,
        };
        assert_eq!(
            candle.check_invariants(),
            Err(CandleInvariantError::LowAboveBody)
        );
        candle.low = 90.0;
        candle.high = 100.5;
        assert_eq!(
            candle.check_invariants(),
            Err(CandleInvariantError::HighBelowBody)
        );
    }

    #[test]
    fn orderbook_invariants() {
        let ob = OrderBook {
            envelope: envelope(),
            bids: vec![
                OrderBookLevel { price: 100.0, quantity: 1.0 },
                OrderBookLevel { price: 99.0, quantity: 2.0 },
            ],
            asks: vec![
                OrderBookLevel { price: 101.0, quantity: 1.0 },
                OrderBookLevel { price: 102.0, quantity: 2.0 },
            ],
        };
        assert!(ob.check_invariants().is_ok());
    }

    #[test]
    fn crossed_book_is_rejected() {
        let ob = OrderBook {
            envelope: envelope(),
            bids: vec![OrderBookLevel { price: 105.0, quantity: 1.0 }],
            asks: vec![OrderBookLevel { price: 101.0, quantity: 1.0 }],
        };
        assert_eq!(ob.check_invariants(), Err(OrderBookInvariantError::CrossedBook));
    }

    #[test]
    fn non_monotonic_bids_are_rejected() {
        let ob = OrderBook {
            envelope: envelope(),
            bids: vec![
                OrderBookLevel { price: 100.0, quantity: 1.0 },
                OrderBookLevel { price: 100.0, quantity: 2.0 },
            ],
            asks: vec![OrderBookLevel { price: 101.0, quantity: 1.0 }],
        };
        assert_eq!(
            ob.check_invariants(),
            Err(OrderBookInvariantError::BidsNotStrictlyDescending)
        );
    }
}
