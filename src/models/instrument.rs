use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Spot,
    Futures,
    Stock,
    Etf,
    Bond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Spot,
    Futures,
    Stock,
}

/// A tradable contract. `symbol` is the primary key.
///
/// Invariants (spec.md 3): `0 <= min_price <= max_price`,
/// `0 <= min_quantity <= max_quantity`, precisions are non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    pub market: Market,
    pub is_active: bool,
    pub min_price: f64,
    pub max_price: f64,
    pub min_quantity: f64,
    pub max_quantity: f64,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

/// Creation request; `is_active` defaults to `true` since an administrator
/// adding an instrument generally means to track it immediately.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInstrumentRequest {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    pub market: Market,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    pub min_price: f64,
    pub max_price: f64,
    pub min_quantity: f64,
    pub max_quantity: f64,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

fn default_is_active() -> bool {
    true
}

impl From<NewInstrumentRequest> for Instrument {
    fn from(req: NewInstrumentRequest) -> Self {
        Self {
            symbol: req.symbol,
            base_asset: req.base_asset,
            quote_asset: req.quote_asset,
            kind: req.kind,
            market: req.market,
            is_active: req.is_active,
            min_price: req.min_price,
            max_price: req.max_price,
            min_quantity: req.min_quantity,
            max_quantity: req.max_quantity,
            price_precision: req.price_precision,
            quantity_precision: req.quantity_precision,
        }
    }
}

/// Explicit update record mirroring `SubscriptionUpdate`: presence of a
/// field implies intent to set it (spec.md 9 "dynamic field-bag updates").
/// `symbol` is the primary key and is not updatable through this record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentUpdate {
    pub base_asset: Option<String>,
    pub quote_asset: Option<String>,
    pub is_active: Option<bool>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_quantity: Option<f64>,
    pub max_quantity: Option<f64>,
    pub price_precision: Option<u32>,
    pub quantity_precision: Option<u32>,
}

impl Instrument {
    pub fn apply_update(&mut self, update: InstrumentUpdate) {
        if let Some(v) = update.base_asset {
            self.base_asset = v;
        }
        if let Some(v) = update.quote_asset {
            self.quote_asset = v;
        }
        if let Some(v) = update.is_active {
            self.is_active = v;
        }
        if let Some(v) = update.min_price {
            self.min_price = v;
        }
        if let Some(v) = update.max_price {
            self.max_price = v;
        }
        if let Some(v) = update.min_quantity {
            self.min_quantity = v;
        }
        if let Some(v) = update.max_quantity {
            self.max_quantity = v;
        }
        if let Some(v) = update.price_precision {
            self.price_precision = v;
        }
        if let Some(v) = update.quantity_precision {
            self.quantity_precision = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentValidationError {
    PriceBounds,
    QuantityBounds,
}

impl std::fmt::Display for InstrumentValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceBounds => write!(f, "min_price must be <= max_price and both >= 0"),
            Self::QuantityBounds => {
                write!(f, "min_quantity must be <= max_quantity and both >= 0")
            }
        }
    }
}

impl std::error::Error for InstrumentValidationError {}

impl Instrument {
    /// Check the bound invariants declared in spec.md 3. Precisions are
    /// `u32` so non-negativity is enforced by the type itself.
    pub fn check_invariants(&self) -> Result<(), InstrumentValidationError> {
        if self.min_price < 0.0 || self.min_price > self.max_price {
            return Err(InstrumentValidationError::PriceBounds);
        }
        if self.min_quantity < 0.0 || self.min_quantity > self.max_quantity {
            return Err(InstrumentValidationError::QuantityBounds);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Instrument {
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
    fn valid_instrument_passes() {
        assert!(sample().check_invariants().is_ok());
    }

    #[test]
    fn inverted_price_bounds_rejected() {
        let mut i = sample();
        i.min_price = 10.0;
        i.max_price = 1.0;
        assert_eq!(
            i.check_invariants(),
            Err(InstrumentValidationError::PriceBounds)
        );
    }

    #[test]
    fn negative_quantity_rejected() {
        let mut i = sample();
        i.min_quantity = -1.0;
        assert_eq!(
            i.check_invariants(),
            Err(InstrumentValidationError::QuantityBounds)
        );
    }
}
