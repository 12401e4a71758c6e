use crate::models::Candle;
use serde::{Deserialize, Serialize};

/// Which candle price feeds a price-based indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Open,
    High,
    Low,
    Close,
    /// (high + low) / 2
    Hl2,
    /// (high + low + close) / 3, the "typical price"
    Hlc3,
    /// (open + high + low + close) / 4
    Ohlc4,
}

impl PriceSource {
    pub fn price(&self, candle: &Candle) -> f64 {
        match self {
            PriceSource::Open => candle.open,
            PriceSource::High => candle.high,
            PriceSource::Low => candle.low,
            PriceSource::Close => candle.close,
            PriceSource::Hl2 => (candle.high + candle.low) / 2.0,
            PriceSource::Hlc3 => (candle.high + candle.low + candle.close) / 3.0,
            PriceSource::Ohlc4 => (candle.open + candle.high + candle.low + candle.close) / 4.0,
        }
    }

    /// Resolve the source once for the whole series
    pub fn extract(&self, candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| self.price(c)).collect()
    }
}
