//! Trend-following indicators: Aroon and Parabolic SAR.

use super::smoothing::finite;
use crate::models::Candle;

#[derive(Debug, Clone, PartialEq)]
pub struct AroonSeries {
    pub up: Vec<Option<f64>>,
    pub down: Vec<Option<f64>>,
}

/// Aroon up/down over the last `period + 1` candles
///
/// Ties resolve to the most recent extreme.
pub fn calculate_aroon(candles: &[Candle], period: usize) -> AroonSeries {
    let mut up = vec![None; candles.len()];
    let mut down = vec![None; candles.len()];
    if period == 0 {
        return AroonSeries { up, down };
    }

    for i in period..candles.len() {
        let window = &candles[i - period..=i];
        let mut high_idx = 0;
        let mut low_idx = 0;
        for (j, candle) in window.iter().enumerate() {
            if candle.high >= window[high_idx].high {
                high_idx = j;
            }
            if candle.low <= window[low_idx].low {
                low_idx = j;
            }
        }
        let since_high = (period - high_idx) as f64;
        let since_low = (period - low_idx) as f64;
        up[i] = Some(100.0 * (period as f64 - since_high) / period as f64);
        down[i] = Some(100.0 * (period as f64 - since_low) / period as f64);
    }

    AroonSeries { up, down }
}

/// Parabolic SAR with acceleration `step` capped at `max_step`
///
/// The first candle only seeds the trend, so values start at index 1.
pub fn calculate_psar(candles: &[Candle], step: f64, max_step: f64) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if candles.len() < 2 {
        return out;
    }

    let (first, second) = (&candles[0], &candles[1]);
    let mut rising = second.close >= first.close;
    let mut sar = if rising {
        first.low.min(second.low)
    } else {
        first.high.max(second.high)
    };
    let mut extreme = if rising {
        first.high.max(second.high)
    } else {
        first.low.min(second.low)
    };
    let mut af = step;
    out[1] = finite(sar);

    for i in 2..candles.len() {
        let candle = &candles[i];
        let mut next = sar + af * (extreme - sar);

        if rising {
            // SAR never moves into the prior two candles' range
            next = next.min(candles[i - 1].low).min(candles[i - 2].low);
            if candle.low < next {
                rising = false;
                next = extreme;
                extreme = candle.low;
                af = step;
            } else if candle.high > extreme {
                extreme = candle.high;
                af = (af + step).min(max_step);
            }
        } else {
            next = next.max(candles[i - 1].high).max(candles[i - 2].high);
            if candle.high > next {
                rising = true;
                next = extreme;
                extreme = candle.high;
                af = step;
            } else if candle.low < extreme {
                extreme = candle.low;
                af = (af + step).min(max_step);
            }
        }

        sar = next;
        out[i] = finite(sar);
    }

    out
}
