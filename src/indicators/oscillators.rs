//! Range and momentum oscillators.

use super::smoothing::{change, lift, ratio, rolling_max, rolling_min, sma, window_map, zip_with};
use crate::models::Candle;

const CCI_CONSTANT: f64 = 0.015;

#[derive(Debug, Clone, PartialEq)]
pub struct StochSeries {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high).collect()
}

fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low).collect()
}

/// Position of the close within the `period` high/low range, 0..100
fn range_position(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let highest = rolling_max(&highs(candles), period);
    let lowest = rolling_min(&lows(candles), period);
    let closes = lift(&candles.iter().map(|c| c.close).collect::<Vec<_>>());

    let range = zip_with(&highest, &lowest, |h, l| Some(h - l));
    let offset = zip_with(&closes, &lowest, |c, l| Some(c - l));
    zip_with(&offset, &range, |o, r| ratio(o, r).map(|x| x * 100.0))
}

/// Stochastic oscillator: %K over `period`, %D as the SMA of %K over `signal_period`
pub fn calculate_stoch(candles: &[Candle], period: usize, signal_period: usize) -> StochSeries {
    let k = range_position(candles, period);
    let d = sma(&k, signal_period);
    StochSeries { k, d }
}

/// Williams %R, -100..0
pub fn calculate_williams_r(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    range_position(candles, period)
        .into_iter()
        .map(|k| k.map(|k| k - 100.0))
        .collect()
}

/// Commodity Channel Index over a typical-price series
pub fn calculate_cci(typical: &[f64], period: usize) -> Vec<Option<f64>> {
    window_map(&lift(typical), period, |window| {
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let mean_deviation = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / n;
        let current = *window.last()?;
        ratio(current - mean, CCI_CONSTANT * mean_deviation)
    })
}

/// Rate of change in percent over `period`
pub fn calculate_roc(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| {
            if i < period {
                return None;
            }
            let past = prices[i - period];
            ratio(prices[i] - past, past).map(|r| r * 100.0)
        })
        .collect()
}

/// Price difference over `period`
pub fn calculate_momentum(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    change(prices, period)
}

/// Awesome Oscillator: fast SMA minus slow SMA of the median price
pub fn calculate_awesome_oscillator(median: &[f64], fast: usize, slow: usize) -> Vec<Option<f64>> {
    let values = lift(median);
    zip_with(&sma(&values, fast), &sma(&values, slow), |f, s| Some(f - s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64, c, c + 1.0, c - 1.0, c, 100.0))
            .collect()
    }

    #[test]
    fn test_stoch_at_top_of_range() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let stoch = calculate_stoch(&candles(&closes), 5, 3);

        assert!(stoch.k[..4].iter().all(Option::is_none));
        // Close 104, range 99..105
        assert!((stoch.k[4].unwrap() - 500.0 / 6.0).abs() < 1e-9);
        assert_eq!(stoch.d.iter().position(Option::is_some), Some(6));
    }

    #[test]
    fn test_williams_r_mirrors_stoch() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let data = candles(&closes);
        let k = calculate_stoch(&data, 5, 3).k;
        let r = calculate_williams_r(&data, 5);

        for i in 4..20 {
            assert!((r[i].unwrap() - (k[i].unwrap() - 100.0)).abs() < 1e-9);
            assert!((-100.0..=0.0).contains(&r[i].unwrap()));
        }
    }

    #[test]
    fn test_flat_range_is_absent() {
        let flat: Vec<Candle> = (0..10).map(|i| Candle::new(i, 5.0, 5.0, 5.0, 5.0, 1.0)).collect();
        let stoch = calculate_stoch(&flat, 5, 3);
        assert!(stoch.k.iter().all(Option::is_none));
        assert!(stoch.d.iter().all(Option::is_none));
    }

    #[test]
    fn test_cci_flat_is_absent_and_trend_positive() {
        assert!(calculate_cci(&[10.0; 30], 20).iter().all(Option::is_none));

        let rising: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let cci = calculate_cci(&rising, 20);
        assert_eq!(cci.iter().position(Option::is_some), Some(19));
        assert!(cci[29].unwrap() > 100.0);
    }

    #[test]
    fn test_roc_and_momentum() {
        let prices = vec![100.0, 105.0, 110.0, 121.0];
        assert_eq!(calculate_momentum(&prices, 2), vec![None, None, Some(10.0), Some(16.0)]);

        let roc = calculate_roc(&prices, 2);
        assert_eq!(roc[2], Some(10.0));
        assert!((roc[3].unwrap() - 100.0 * 16.0 / 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_roc_zero_base_is_absent() {
        assert_eq!(calculate_roc(&[0.0, 1.0], 1), vec![None, None]);
    }

    #[test]
    fn test_awesome_oscillator_warmup() {
        let median: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let ao = calculate_awesome_oscillator(&median, 5, 34);
        assert_eq!(ao.iter().position(Option::is_some), Some(33));
        // Fast average sits closer to the latest price in an uptrend
        assert!(ao[39].unwrap() > 0.0);
    }
}
