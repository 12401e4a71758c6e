//! Average Directional Index (ADX) - Measures trend strength
//!
//! ADX ranges from 0 to 100:
//! - ADX > 25: Strong trend (bull or bear)
//! - ADX 20-25: Moderate trend
//! - ADX < 20: Weak trend / choppy / ranging market
//!
//! Also returns +DI and -DI to determine trend direction:
//! - +DI > -DI: Uptrend
//! - -DI > +DI: Downtrend

use super::atr::true_range;
use super::smoothing::{ratio, wilder, zip_with};
use crate::models::Candle;

#[derive(Debug, Clone, PartialEq)]
pub struct AdxSeries {
    pub adx: Vec<Option<f64>>,
    pub plus_di: Vec<Option<f64>>,
    pub minus_di: Vec<Option<f64>>,
}

/// ADX, +DI and -DI aligned with `candles`
///
/// DI values start at index `period`; ADX is the Wilder average of DX and
/// starts at index `2 * period - 1`.
pub fn calculate_adx(candles: &[Candle], period: usize) -> AdxSeries {
    let len = candles.len();
    let mut plus_dms = vec![None; len];
    let mut minus_dms = vec![None; len];

    for i in 1..len {
        // Directional Movement
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;

        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };

        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        plus_dms[i] = Some(plus_dm);
        minus_dms[i] = Some(minus_dm);
    }

    let smoothed_tr = wilder(&true_range(candles), period);
    let smoothed_plus_dm = wilder(&plus_dms, period);
    let smoothed_minus_dm = wilder(&minus_dms, period);

    let plus_di = zip_with(&smoothed_plus_dm, &smoothed_tr, |dm, tr| {
        ratio(dm, tr).map(|r| r * 100.0)
    });
    let minus_di = zip_with(&smoothed_minus_dm, &smoothed_tr, |dm, tr| {
        ratio(dm, tr).map(|r| r * 100.0)
    });

    let dx = zip_with(&plus_di, &minus_di, |plus, minus| {
        ratio((plus - minus).abs(), plus + minus).map(|r| r * 100.0)
    });
    let adx = wilder(&dx, period);

    AdxSeries {
        adx,
        plus_di,
        minus_di,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| {
                Candle::new(i as i64 * 3_600_000, open, high, low, close, 1000.0)
            })
            .collect()
    }

    fn uptrend(len: usize) -> Vec<Candle> {
        let prices: Vec<(f64, f64, f64, f64)> = (0..len)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                (base, base + 5.0, base - 1.0, base + 3.0)
            })
            .collect();
        create_test_candles(&prices)
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let series = calculate_adx(&uptrend(40), 14);
        let last = 39;

        assert!(series.plus_di[last].unwrap() > series.minus_di[last].unwrap(), "+DI should be > -DI in uptrend");
        assert!(series.adx[last].unwrap() > 25.0, "ADX should be high in a strong trend");
    }

    #[test]
    fn test_adx_warmup_positions() {
        let series = calculate_adx(&uptrend(40), 14);

        assert_eq!(series.plus_di.iter().position(Option::is_some), Some(14));
        assert_eq!(series.adx.iter().position(Option::is_some), Some(27));
    }

    #[test]
    fn test_adx_choppy_market() {
        // Simulating a choppy/ranging market
        let swings = [
            (100.0, 102.0, 98.0, 100.0),
            (100.0, 103.0, 97.0, 99.0),
            (99.0, 102.0, 98.0, 101.0),
            (101.0, 103.0, 99.0, 100.0),
            (100.0, 102.0, 98.0, 99.0),
            (99.0, 103.0, 97.0, 101.0),
        ];
        let prices: Vec<(f64, f64, f64, f64)> = swings.iter().cycle().take(40).copied().collect();
        let series = calculate_adx(&create_test_candles(&prices), 14);

        let adx = series.adx[39].unwrap();
        assert!(adx < 40.0, "ADX should be lower in choppy market, got {:.2}", adx);
    }

    #[test]
    fn test_adx_insufficient_data() {
        let candles = create_test_candles(&[(100.0, 102.0, 99.0, 101.0), (101.0, 105.0, 100.0, 104.0)]);
        let series = calculate_adx(&candles, 14);

        assert!(series.adx.iter().all(Option::is_none), "No ADX for insufficient data");
    }
}
