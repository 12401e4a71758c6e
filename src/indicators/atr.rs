//! Average True Range (ATR) indicator
//!
//! Measures market volatility by calculating the average of true ranges over a period.
//! True Range is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! Uses Wilder's smoothing (same as RSI and ADX) for the moving average.

use super::smoothing::{ratio, wilder};
use crate::models::Candle;

/// True range aligned with `candles`; the first candle has no previous close
pub fn true_range(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        out[i] = Some(tr);
    }
    out
}

/// ATR series aligned with `candles`, first value at index `period`
pub fn calculate_atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    wilder(&true_range(candles), period)
}

/// Normalized ATR: ATR as a percentage of the close
pub fn calculate_natr(candles: &[Candle], atr: &[Option<f64>]) -> Vec<Option<f64>> {
    candles
        .iter()
        .zip(atr)
        .map(|(candle, atr)| atr.and_then(|atr| ratio(atr, candle.close)).map(|r| r * 100.0))
        .collect()
}
