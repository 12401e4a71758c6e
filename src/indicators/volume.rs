//! Volume-weighted indicators.

use super::smoothing::{finite, ratio, window_map};
use crate::models::Candle;

/// Money-flow multiplier times volume; a zero-range candle contributes nothing
fn money_flow_volume(candle: &Candle) -> f64 {
    let range = candle.high - candle.low;
    if range == 0.0 {
        return 0.0;
    }
    ((candle.close - candle.low) - (candle.high - candle.close)) / range * candle.volume
}

/// On-Balance Volume, seeded with the first candle's volume
pub fn calculate_obv(candles: &[Candle]) -> Vec<Option<f64>> {
    let Some(first) = candles.first() else {
        return Vec::new();
    };
    let mut obv = first.volume;
    let mut out = Vec::with_capacity(candles.len());
    out.push(finite(obv));

    for pair in candles.windows(2) {
        let (prev, candle) = (&pair[0], &pair[1]);
        if candle.close > prev.close {
            obv += candle.volume;
        } else if candle.close < prev.close {
            obv -= candle.volume;
        }
        out.push(finite(obv));
    }
    out
}

/// Rolling volume-weighted average of `prices` over `period` candles
pub fn calculate_vwap(candles: &[Candle], prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..candles.len() {
        let range = i + 1 - period..=i;
        let volume: f64 = candles[range.clone()].iter().map(|c| c.volume).sum();
        let weighted: f64 = range.map(|j| prices[j] * candles[j].volume).sum();
        out[i] = ratio(weighted, volume);
    }
    out
}

/// Chaikin Money Flow over `period`
pub fn calculate_cmf(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..candles.len() {
        let window = &candles[i + 1 - period..=i];
        let flow: f64 = window.iter().map(money_flow_volume).sum();
        let volume: f64 = window.iter().map(|c| c.volume).sum();
        out[i] = ratio(flow, volume);
    }
    out
}

/// Accumulation/Distribution line
pub fn calculate_ad(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut total = 0.0;
    candles
        .iter()
        .map(|candle| {
            total += money_flow_volume(candle);
            finite(total)
        })
        .collect()
}

/// Money Flow Index over a typical-price series
pub fn calculate_mfi(candles: &[Candle], typical: &[f64], period: usize) -> Vec<Option<f64>> {
    // Signed raw money flow, defined from the second candle on
    let mut flows: Vec<Option<f64>> = vec![None; candles.len()];
    for i in 1..candles.len() {
        let raw = typical[i] * candles[i].volume;
        flows[i] = Some(if typical[i] > typical[i - 1] {
            raw
        } else if typical[i] < typical[i - 1] {
            -raw
        } else {
            0.0
        });
    }

    window_map(&flows, period, |window| {
        let positive: f64 = window.iter().filter(|f| **f > 0.0).sum();
        let negative: f64 = -window.iter().filter(|f| **f < 0.0).sum::<f64>();
        if negative == 0.0 {
            return (positive > 0.0).then_some(100.0);
        }
        ratio(positive, negative).map(|r| 100.0 - 100.0 / (1.0 + r))
    })
}
