//! Moving averages and the oscillators built directly on them.

use super::smoothing::{ema, lift, ratio, sma, wma, zip_with};

/// Simple Moving Average (SMA), aligned with `prices`
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    sma(&lift(prices), period)
}

/// Exponential Moving Average (EMA), seeded with the SMA of the first `period` prices
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    ema(&lift(prices), period)
}

/// Weighted Moving Average (WMA)
pub fn calculate_wma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    wma(&lift(prices), period)
}

/// Double EMA: `2 * EMA - EMA(EMA)`
pub fn calculate_dema(ema1: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let ema2 = ema(ema1, period);
    zip_with(ema1, &ema2, |e1, e2| Some(2.0 * e1 - e2))
}

/// Triple EMA: `3 * EMA - 3 * EMA(EMA) + EMA(EMA(EMA))`
pub fn calculate_tema(ema1: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let ema2 = ema(ema1, period);
    let ema3 = ema(&ema2, period);
    let partial = zip_with(ema1, &ema2, |e1, e2| Some(3.0 * e1 - 3.0 * e2));
    zip_with(&partial, &ema3, |p, e3| Some(p + e3))
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// MACD from precomputed fast and slow EMAs
///
/// The signal line is an EMA of the MACD line and starts once `signal_period`
/// MACD values exist.
pub fn calculate_macd(
    fast_ema: &[Option<f64>],
    slow_ema: &[Option<f64>],
    signal_period: usize,
) -> MacdSeries {
    let macd = zip_with(fast_ema, slow_ema, |fast, slow| Some(fast - slow));
    let signal = ema(&macd, signal_period);
    let histogram = zip_with(&macd, &signal, |m, s| Some(m - s));
    MacdSeries {
        macd,
        signal,
        histogram,
    }
}

/// Percentage Price Oscillator: `100 * (fast - slow) / slow`
pub fn calculate_ppo(fast_ema: &[Option<f64>], slow_ema: &[Option<f64>]) -> Vec<Option<f64>> {
    zip_with(fast_ema, slow_ema, |fast, slow| {
        ratio(fast - slow, slow).map(|r| r * 100.0)
    })
}

/// TRIX: one-period percent change of a triple-smoothed EMA
pub fn calculate_trix(ema1: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let ema3 = ema(&ema(ema1, period), period);
    let mut out = vec![None; ema3.len()];
    for i in 1..ema3.len() {
        if let (Some(prev), Some(cur)) = (ema3[i - 1], ema3[i]) {
            out[i] = ratio(cur - prev, prev).map(|r| r * 100.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes() -> Vec<f64> {
        (0..20).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn test_sma_warmup() {
        let sma = calculate_sma(&closes(), 5);
        assert!(sma[..4].iter().all(Option::is_none));
        assert_eq!(sma[4], Some(102.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let sma = calculate_sma(&[100.0, 102.0], 5);
        assert!(sma.iter().all(Option::is_none));
    }

    #[test]
    fn test_ema_tracks_trend() {
        let ema = calculate_ema(&[100.0, 102.0, 104.0, 106.0, 108.0, 110.0], 5);
        assert_eq!(ema[4], Some(104.0));
        assert!(ema[5].unwrap() > 104.0); // EMA should be above initial SMA
    }

    #[test]
    fn test_dema_tema_warmup_lengths() {
        let period = 3;
        let ema1 = calculate_ema(&closes(), period);
        let dema = calculate_dema(&ema1, period);
        let tema = calculate_tema(&ema1, period);

        assert_eq!(dema.iter().position(Option::is_some), Some(2 * (period - 1)));
        assert_eq!(tema.iter().position(Option::is_some), Some(3 * (period - 1)));
    }

    #[test]
    fn test_dema_tema_on_linear_series_have_no_lag() {
        let period = 3;
        let prices = closes();
        let ema1 = calculate_ema(&prices, period);
        let dema = calculate_dema(&ema1, period);
        let tema = calculate_tema(&ema1, period);

        // EMA lags a ramp by a constant; DEMA and TEMA remove that lag
        let last = prices.len() - 1;
        assert!((dema[last].unwrap() - prices[last]).abs() < 0.1);
        assert!((tema[last].unwrap() - prices[last]).abs() < 0.01);
    }

    #[test]
    fn test_macd_histogram_is_difference() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let macd = calculate_macd(&calculate_ema(&prices, 12), &calculate_ema(&prices, 26), 9);

        assert_eq!(macd.macd.iter().position(Option::is_some), Some(25));
        assert_eq!(macd.signal.iter().position(Option::is_some), Some(33));
        for i in 33..60 {
            let expected = macd.macd[i].unwrap() - macd.signal[i].unwrap();
            assert!((macd.histogram[i].unwrap() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ppo_flat_series_is_zero() {
        let prices = vec![50.0; 40];
        let ppo = calculate_ppo(&calculate_ema(&prices, 12), &calculate_ema(&prices, 26));
        assert_eq!(ppo[25], Some(0.0));
    }

    #[test]
    fn test_trix_positive_in_uptrend() {
        let ema1 = calculate_ema(&closes(), 3);
        let trix = calculate_trix(&ema1, 3);
        assert_eq!(trix.iter().position(Option::is_some), Some(7));
        assert!(trix[19].unwrap() > 0.0);
    }
}
