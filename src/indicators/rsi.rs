//! Relative Strength Index (RSI)
//!
//! RSI measures the magnitude of recent price changes to evaluate
//! overbought or oversold conditions.
//!
//! Values:
//! - RSI > 70: Overbought
//! - RSI < 30: Oversold
//!
//! Average gain and loss use Wilder's smoothing, so the first value lands on
//! index `period` (the first price has no change).

use super::smoothing::{ratio, wilder, window_map};

pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut gains = vec![None; prices.len()];
    let mut losses = vec![None; prices.len()];

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        gains[i] = Some(change.max(0.0));
        losses[i] = Some((-change).max(0.0));
    }

    let avg_gain = wilder(&gains, period);
    let avg_loss = wilder(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(gain, loss)| match (gain, loss) {
            // A flat window has no defined strength
            (Some(g), Some(l)) if *g == 0.0 && *l == 0.0 => None,
            (Some(_), Some(l)) if *l == 0.0 => Some(100.0),
            (Some(g), Some(l)) => ratio(*g, *l).map(|rs| 100.0 - 100.0 / (1.0 + rs)),
            _ => None,
        })
        .collect()
}

/// Stochastic RSI on a 0..100 scale: where RSI sits within its own `period` range
pub fn calculate_stoch_rsi(rsi: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    window_map(rsi, period, |window| {
        let high = window.iter().copied().fold(f64::MIN, f64::max);
        let low = window.iter().copied().fold(f64::MAX, f64::min);
        let current = *window.last()?;
        ratio(current - low, high - low).map(|r| r * 100.0)
    })
}
