//! Series primitives shared by the calculators.
//!
//! Every function returns a vector aligned with its input: slot `i` holds the
//! value at candle `i`, or `None` while the window is still warming up.
//! Optional inputs propagate: a window containing a gap yields `None`, and the
//! recursive smoothers restart their seed after a gap.

/// Recursive smoothing families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Smoothing {
    /// Plain moving average over the window
    Simple,
    /// `k = 2 / (n + 1)`, seeded with the simple average of the first `n` values
    Exponential,
    /// `avg = (avg * (n - 1) + x) / n`, seeded the same way
    Wilder,
}

pub fn lift(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|v| Some(*v)).collect()
}

/// `Some(x)` only for finite `x`
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Division yielding `None` instead of Inf/NaN
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    finite(numerator / denominator)
}

pub fn smooth(values: &[Option<f64>], period: usize, smoothing: Smoothing) -> Vec<Option<f64>> {
    match smoothing {
        Smoothing::Simple => sma(values, period),
        Smoothing::Exponential => recursive(values, period, |prev, x| {
            let k = 2.0 / (period as f64 + 1.0);
            prev + k * (x - prev)
        }),
        Smoothing::Wilder => recursive(values, period, |prev, x| {
            (prev * (period as f64 - 1.0) + x) / period as f64
        }),
    }
}

pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    window_map(values, period, |window| {
        Some(window.iter().sum::<f64>() / period as f64)
    })
}

pub fn ema(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    smooth(values, period, Smoothing::Exponential)
}

pub fn wilder(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    smooth(values, period, Smoothing::Wilder)
}

/// Linearly weighted average, newest value weighted `n`
pub fn wma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let denominator = period as f64 * (period as f64 + 1.0) / 2.0;
    window_map(values, period, |window| {
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(i, v)| v * (i + 1) as f64)
            .sum();
        Some(weighted / denominator)
    })
}

/// Population standard deviation over the window
pub fn stddev(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    window_map(values, period, |window| {
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        finite(variance.sqrt())
    })
}

pub fn rolling_max(values: &[f64], period: usize) -> Vec<Option<f64>> {
    window_map(&lift(values), period, |window| {
        window.iter().copied().reduce(f64::max)
    })
}

pub fn rolling_min(values: &[f64], period: usize) -> Vec<Option<f64>> {
    window_map(&lift(values), period, |window| {
        window.iter().copied().reduce(f64::min)
    })
}

/// Apply `f` to every full window of `period` present values
///
/// The window is passed oldest first.
pub fn window_map<F>(values: &[Option<f64>], period: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let mut window = Vec::with_capacity(period.min(values.len()));
    for i in (period - 1)..values.len() {
        window.clear();
        for v in &values[i + 1 - period..=i] {
            match v {
                Some(v) => window.push(*v),
                None => break,
            }
        }
        if window.len() == period {
            out[i] = f(&window);
        }
    }
    out
}

fn recursive<F>(values: &[Option<f64>], period: usize, step: F) -> Vec<Option<f64>>
where
    F: Fn(f64, f64) -> f64,
{
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let mut prev: Option<f64> = None;
    let mut seed_sum = 0.0;
    let mut seed_count = 0;

    for (i, value) in values.iter().enumerate() {
        let Some(x) = *value else {
            prev = None;
            seed_sum = 0.0;
            seed_count = 0;
            continue;
        };
        prev = match prev {
            Some(p) => Some(step(p, x)),
            None => {
                seed_sum += x;
                seed_count += 1;
                (seed_count == period).then(|| seed_sum / period as f64)
            }
        };
        out[i] = prev.and_then(finite);
    }
    out
}

/// `values[i] - values[i - lag]`
pub fn change(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| (i >= lag).then(|| values[i] - values[i - lag]))
        .collect()
}

/// Elementwise combination, `None` when either side is missing
pub fn zip_with<F>(a: &[Option<f64>], b: &[Option<f64>], f: F) -> Vec<Option<f64>>
where
    F: Fn(f64, f64) -> Option<f64>,
{
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => f(*x, *y),
            _ => None,
        })
        .collect()
}
