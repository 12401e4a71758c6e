//! Volatility bands and channels.

use super::smoothing::{lift, ratio, rolling_max, rolling_min, sma, stddev, zip_with};
use crate::models::Candle;

/// Upper/middle/lower envelope aligned with the candles
#[derive(Debug, Clone, PartialEq)]
pub struct BandSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl BandSeries {
    fn around(middle: Vec<Option<f64>>, width: &[Option<f64>], multiplier: f64) -> Self {
        let upper = zip_with(&middle, width, |m, w| Some(m + multiplier * w));
        let lower = zip_with(&middle, width, |m, w| Some(m - multiplier * w));
        Self {
            upper,
            middle,
            lower,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub bands: BandSeries,
    /// Where the price sits within the bands, 0 at the lower band and 1 at the upper
    pub percent_b: Vec<Option<f64>>,
}

/// Bollinger Bands: SMA ± `multiplier` population standard deviations
pub fn calculate_bollinger(prices: &[f64], period: usize, multiplier: f64) -> BollingerSeries {
    let values = lift(prices);
    let bands = BandSeries::around(sma(&values, period), &stddev(&values, period), multiplier);

    let offset = zip_with(&values, &bands.lower, |p, l| Some(p - l));
    let width = zip_with(&bands.upper, &bands.lower, |u, l| Some(u - l));
    let percent_b = zip_with(&offset, &width, ratio);

    BollingerSeries { bands, percent_b }
}

/// Keltner Channels from a precomputed EMA midline and ATR
pub fn calculate_keltner(ema: &[Option<f64>], atr: &[Option<f64>], multiplier: f64) -> BandSeries {
    BandSeries::around(ema.to_vec(), atr, multiplier)
}

/// Donchian Channels: highest high and lowest low over `period`
pub fn calculate_donchian(candles: &[Candle], period: usize) -> BandSeries {
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let upper = rolling_max(&highs, period);
    let lower = rolling_min(&lows, period);
    let middle = zip_with(&upper, &lower, |u, l| Some((u + l) / 2.0));
    BandSeries {
        upper,
        middle,
        lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::atr::calculate_atr;
    use crate::indicators::moving_average::calculate_ema;

    #[test]
    fn test_bollinger_known_window() {
        let prices = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bb = calculate_bollinger(&prices, 8, 2.0);

        assert!(bb.bands.middle[..7].iter().all(Option::is_none));
        assert_eq!(bb.bands.middle[7], Some(5.0));
        assert_eq!(bb.bands.upper[7], Some(9.0));
        assert_eq!(bb.bands.lower[7], Some(1.0));
        assert_eq!(bb.percent_b[7], Some(1.0));
    }

    #[test]
    fn test_bollinger_flat_has_no_percent_b() {
        let bb = calculate_bollinger(&[10.0; 25], 20, 2.0);
        assert_eq!(bb.bands.upper[19], Some(10.0));
        assert!(bb.percent_b.iter().all(Option::is_none));
    }

    #[test]
    fn test_keltner_wraps_ema_with_atr() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let c = 100.0 + i as f64;
                Candle::new(i, c, c + 2.0, c - 2.0, c, 10.0)
            })
            .collect();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema = calculate_ema(&closes, 20);
        let atr = calculate_atr(&candles, 20);
        let kc = calculate_keltner(&ema, &atr, 2.0);

        assert!(kc.upper[19].is_none(), "ATR needs one more candle than the EMA");
        let mid = kc.middle[29].unwrap();
        let width = atr[29].unwrap();
        assert!((kc.upper[29].unwrap() - (mid + 2.0 * width)).abs() < 1e-9);
        assert!((kc.lower[29].unwrap() - (mid - 2.0 * width)).abs() < 1e-9);
    }

    #[test]
    fn test_donchian_channel() {
        let candles: Vec<Candle> = [5.0, 8.0, 3.0, 6.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64, c, c + 1.0, c - 1.0, c, 1.0))
            .collect();
        let dc = calculate_donchian(&candles, 3);

        assert_eq!(dc.upper[2], Some(9.0));
        assert_eq!(dc.lower[2], Some(2.0));
        assert_eq!(dc.middle[2], Some(5.5));
        assert_eq!(dc.upper[3], Some(9.0));
        assert_eq!(dc.lower[3], Some(2.0));
    }
}
