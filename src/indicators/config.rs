//! Indicator configuration layers and their resolution.
//!
//! A layer ([`IndicatorConfig`]) only carries the fields someone chose to set.
//! Layers are merged field by field over the built-in defaults, lowest priority
//! first (system default, then connector, then job), and the result is checked
//! per indicator: an indicator with unusable parameters falls back to its
//! built-in parameters while keeping its enable flag.

use super::source::PriceSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Wma,
    Dema,
    Tema,
    Macd,
    Ppo,
    Trix,
    Rsi,
    Stoch,
    StochRsi,
    WilliamsR,
    Cci,
    Roc,
    Momentum,
    Mfi,
    AwesomeOscillator,
    Adx,
    Aroon,
    Psar,
    Atr,
    Natr,
    Bollinger,
    Keltner,
    Donchian,
    Stddev,
    Obv,
    Vwap,
    Cmf,
    Ad,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 30] = [
        IndicatorKind::Sma,
        IndicatorKind::Ema,
        IndicatorKind::Wma,
        IndicatorKind::Dema,
        IndicatorKind::Tema,
        IndicatorKind::Macd,
        IndicatorKind::Ppo,
        IndicatorKind::Trix,
        IndicatorKind::Rsi,
        IndicatorKind::Stoch,
        IndicatorKind::StochRsi,
        IndicatorKind::WilliamsR,
        IndicatorKind::Cci,
        IndicatorKind::Roc,
        IndicatorKind::Momentum,
        IndicatorKind::Mfi,
        IndicatorKind::AwesomeOscillator,
        IndicatorKind::Adx,
        IndicatorKind::Aroon,
        IndicatorKind::Psar,
        IndicatorKind::Atr,
        IndicatorKind::Natr,
        IndicatorKind::Bollinger,
        IndicatorKind::Keltner,
        IndicatorKind::Donchian,
        IndicatorKind::Stddev,
        IndicatorKind::Obv,
        IndicatorKind::Vwap,
        IndicatorKind::Cmf,
        IndicatorKind::Ad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Wma => "wma",
            IndicatorKind::Dema => "dema",
            IndicatorKind::Tema => "tema",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Ppo => "ppo",
            IndicatorKind::Trix => "trix",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Stoch => "stoch",
            IndicatorKind::StochRsi => "stoch_rsi",
            IndicatorKind::WilliamsR => "williams_r",
            IndicatorKind::Cci => "cci",
            IndicatorKind::Roc => "roc",
            IndicatorKind::Momentum => "momentum",
            IndicatorKind::Mfi => "mfi",
            IndicatorKind::AwesomeOscillator => "awesome_oscillator",
            IndicatorKind::Adx => "adx",
            IndicatorKind::Aroon => "aroon",
            IndicatorKind::Psar => "psar",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Natr => "natr",
            IndicatorKind::Bollinger => "bollinger",
            IndicatorKind::Keltner => "keltner",
            IndicatorKind::Donchian => "donchian",
            IndicatorKind::Stddev => "stddev",
            IndicatorKind::Obv => "obv",
            IndicatorKind::Vwap => "vwap",
            IndicatorKind::Cmf => "cmf",
            IndicatorKind::Ad => "ad",
        }
    }

    /// Keys this indicator writes into a candle's indicator map
    pub fn output_keys(&self) -> &'static [&'static str] {
        match self {
            IndicatorKind::Macd => &["macd", "macd_signal", "macd_histogram"],
            IndicatorKind::Stoch => &["stoch_k", "stoch_d"],
            IndicatorKind::Adx => &["adx", "plus_di", "minus_di"],
            IndicatorKind::Aroon => &["aroon_up", "aroon_down"],
            IndicatorKind::Bollinger => &["bb_upper", "bb_middle", "bb_lower", "bb_percent_b"],
            IndicatorKind::Keltner => &["kc_upper", "kc_middle", "kc_lower"],
            IndicatorKind::Donchian => &["dc_upper", "dc_middle", "dc_lower"],
            IndicatorKind::Sma => &["sma"],
            IndicatorKind::Ema => &["ema"],
            IndicatorKind::Wma => &["wma"],
            IndicatorKind::Dema => &["dema"],
            IndicatorKind::Tema => &["tema"],
            IndicatorKind::Ppo => &["ppo"],
            IndicatorKind::Trix => &["trix"],
            IndicatorKind::Rsi => &["rsi"],
            IndicatorKind::StochRsi => &["stoch_rsi"],
            IndicatorKind::WilliamsR => &["williams_r"],
            IndicatorKind::Cci => &["cci"],
            IndicatorKind::Roc => &["roc"],
            IndicatorKind::Momentum => &["momentum"],
            IndicatorKind::Mfi => &["mfi"],
            IndicatorKind::AwesomeOscillator => &["awesome_oscillator"],
            IndicatorKind::Psar => &["psar"],
            IndicatorKind::Atr => &["atr"],
            IndicatorKind::Natr => &["natr"],
            IndicatorKind::Stddev => &["stddev"],
            IndicatorKind::Obv => &["obv"],
            IndicatorKind::Vwap => &["vwap"],
            IndicatorKind::Cmf => &["cmf"],
            IndicatorKind::Ad => &["ad"],
        }
    }

    /// Kind producing the given output key
    pub fn for_output_key(key: &str) -> Option<IndicatorKind> {
        IndicatorKind::ALL
            .into_iter()
            .find(|kind| kind.output_keys().contains(&key))
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndicatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndicatorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown indicator: {}", s))
    }
}

/// Optional per-indicator overrides; unset fields defer to lower layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_period: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_acceleration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PriceSource>,
}

impl IndicatorParams {
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Default::default()
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_fast_slow(mut self, fast: usize, slow: usize) -> Self {
        self.fast_period = Some(fast);
        self.slow_period = Some(slow);
        self
    }

    pub fn with_signal_period(mut self, signal: usize) -> Self {
        self.signal_period = Some(signal);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_acceleration(mut self, step: f64, max: f64) -> Self {
        self.acceleration = Some(step);
        self.max_acceleration = Some(max);
        self
    }

    pub fn with_source(mut self, source: PriceSource) -> Self {
        self.source = Some(source);
        self
    }

    fn apply_to(&self, resolved: &mut ResolvedParams) {
        if let Some(v) = self.enabled {
            resolved.enabled = v;
        }
        if let Some(v) = self.period {
            resolved.period = v;
        }
        if let Some(v) = self.fast_period {
            resolved.fast_period = v;
        }
        if let Some(v) = self.slow_period {
            resolved.slow_period = v;
        }
        if let Some(v) = self.signal_period {
            resolved.signal_period = v;
        }
        if let Some(v) = self.multiplier {
            resolved.multiplier = v;
        }
        if let Some(v) = self.acceleration {
            resolved.acceleration = v;
        }
        if let Some(v) = self.max_acceleration {
            resolved.max_acceleration = v;
        }
        if let Some(v) = self.source {
            resolved.source = v;
        }
    }
}

/// One configuration layer: overrides keyed by indicator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorConfig {
    indicators: BTreeMap<IndicatorKind, IndicatorParams>,
}

impl IndicatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer enabling exactly `kinds` and disabling everything else
    pub fn only(kinds: &[IndicatorKind]) -> Self {
        let mut config = Self::new();
        for kind in IndicatorKind::ALL {
            let params = if kinds.contains(&kind) {
                IndicatorParams::enabled()
            } else {
                IndicatorParams::disabled()
            };
            config.set(kind, params);
        }
        config
    }

    pub fn with(mut self, kind: IndicatorKind, params: IndicatorParams) -> Self {
        self.set(kind, params);
        self
    }

    pub fn set(&mut self, kind: IndicatorKind, params: IndicatorParams) {
        self.indicators.insert(kind, params);
    }

    pub fn get(&self, kind: IndicatorKind) -> Option<&IndicatorParams> {
        self.indicators.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndicatorKind, &IndicatorParams)> {
        self.indicators.iter()
    }
}

/// Fully resolved parameters of one indicator
///
/// Fields an indicator does not use are carried along untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedParams {
    pub enabled: bool,
    pub period: usize,
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
    pub multiplier: f64,
    pub acceleration: f64,
    pub max_acceleration: f64,
    pub source: PriceSource,
}

impl ResolvedParams {
    /// Built-in parameters; every indicator is enabled unless a layer turns it off
    pub fn builtin(kind: IndicatorKind) -> Self {
        let base = Self {
            enabled: true,
            period: 14,
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
            multiplier: 2.0,
            acceleration: 0.02,
            max_acceleration: 0.2,
            source: PriceSource::Close,
        };
        match kind {
            IndicatorKind::Sma
            | IndicatorKind::Ema
            | IndicatorKind::Wma
            | IndicatorKind::Dema
            | IndicatorKind::Tema
            | IndicatorKind::Donchian
            | IndicatorKind::Stddev
            | IndicatorKind::Cmf
            | IndicatorKind::Bollinger
            | IndicatorKind::Keltner => Self { period: 20, ..base },
            IndicatorKind::Cci | IndicatorKind::Vwap => Self {
                period: 20,
                source: PriceSource::Hlc3,
                ..base
            },
            IndicatorKind::Trix => Self { period: 15, ..base },
            IndicatorKind::Roc => Self { period: 12, ..base },
            IndicatorKind::Momentum => Self { period: 10, ..base },
            IndicatorKind::Aroon => Self { period: 25, ..base },
            IndicatorKind::Stoch => Self {
                signal_period: 3,
                ..base
            },
            IndicatorKind::AwesomeOscillator => Self {
                fast_period: 5,
                slow_period: 34,
                source: PriceSource::Hl2,
                ..base
            },
            _ => base,
        }
    }

    /// Check the fields `kind` actually reads
    pub fn validate(&self, kind: IndicatorKind) -> Result<(), String> {
        match kind {
            IndicatorKind::Obv | IndicatorKind::Ad => Ok(()),
            IndicatorKind::Macd => {
                self.check_fast_slow()?;
                positive("signal_period", self.signal_period)
            }
            IndicatorKind::Ppo | IndicatorKind::AwesomeOscillator => self.check_fast_slow(),
            IndicatorKind::Stoch => {
                positive("period", self.period)?;
                positive("signal_period", self.signal_period)
            }
            IndicatorKind::Bollinger | IndicatorKind::Keltner => {
                positive("period", self.period)?;
                if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
                    return Err(format!("multiplier must be positive, got {}", self.multiplier));
                }
                Ok(())
            }
            IndicatorKind::Psar => {
                let (step, max) = (self.acceleration, self.max_acceleration);
                if !(step.is_finite() && max.is_finite() && step > 0.0 && step <= max && max <= 1.0) {
                    return Err(format!(
                        "acceleration must satisfy 0 < step <= max <= 1, got {} / {}",
                        step, max
                    ));
                }
                Ok(())
            }
            _ => positive("period", self.period),
        }
    }

    fn check_fast_slow(&self) -> Result<(), String> {
        positive("fast_period", self.fast_period)?;
        positive("slow_period", self.slow_period)?;
        if self.slow_period <= self.fast_period {
            return Err(format!(
                "slow_period ({}) must exceed fast_period ({})",
                self.slow_period, self.fast_period
            ));
        }
        Ok(())
    }
}

/// Longest lookback any indicator accepts
pub const MAX_PERIOD: usize = 10_000;

fn positive(field: &str, value: usize) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{} must be at least 1", field));
    }
    if value > MAX_PERIOD {
        return Err(format!("{} must be at most {}, got {}", field, MAX_PERIOD, value));
    }
    Ok(())
}

/// Number of leading candles for which `kind` cannot produce a value
pub fn warmup(kind: IndicatorKind, p: &ResolvedParams) -> usize {
    let n = p.period;
    let m = n.saturating_sub(1);
    match kind {
        IndicatorKind::Obv | IndicatorKind::Ad => 0,
        IndicatorKind::Psar => 1,
        IndicatorKind::Dema => m.saturating_mul(2),
        IndicatorKind::Tema => m.saturating_mul(3),
        IndicatorKind::Trix => m.saturating_mul(3).saturating_add(1),
        IndicatorKind::Macd => p.slow_period.saturating_add(p.signal_period).saturating_sub(2),
        IndicatorKind::Ppo | IndicatorKind::AwesomeOscillator => p.slow_period.saturating_sub(1),
        IndicatorKind::Stoch => n.saturating_add(p.signal_period).saturating_sub(2),
        IndicatorKind::StochRsi | IndicatorKind::Adx => n.saturating_mul(2).saturating_sub(1),
        IndicatorKind::Rsi
        | IndicatorKind::Roc
        | IndicatorKind::Momentum
        | IndicatorKind::Mfi
        | IndicatorKind::Aroon
        | IndicatorKind::Atr
        | IndicatorKind::Natr
        | IndicatorKind::Keltner => n,
        _ => m,
    }
}

/// Layers merged over the built-in defaults and validated
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveIndicatorConfig {
    params: BTreeMap<IndicatorKind, ResolvedParams>,
    fallbacks: Vec<IndicatorKind>,
}

impl EffectiveIndicatorConfig {
    pub fn builtin() -> Self {
        Self::resolve(&[])
    }

    /// Merge `layers` in order (later layers win) and validate the result
    pub fn resolve(layers: &[&IndicatorConfig]) -> Self {
        let mut params = BTreeMap::new();
        let mut fallbacks = Vec::new();

        for kind in IndicatorKind::ALL {
            let mut resolved = ResolvedParams::builtin(kind);
            for layer in layers {
                if let Some(overrides) = layer.get(kind) {
                    overrides.apply_to(&mut resolved);
                }
            }

            if let Err(reason) = resolved.validate(kind) {
                warn!(
                    "Invalid {} parameters ({}), falling back to defaults",
                    kind, reason
                );
                resolved = ResolvedParams {
                    enabled: resolved.enabled,
                    ..ResolvedParams::builtin(kind)
                };
                fallbacks.push(kind);
            }
            params.insert(kind, resolved);
        }

        Self { params, fallbacks }
    }

    pub fn get(&self, kind: IndicatorKind) -> ResolvedParams {
        self.params
            .get(&kind)
            .copied()
            .unwrap_or_else(|| ResolvedParams::builtin(kind))
    }

    pub fn is_enabled(&self, kind: IndicatorKind) -> bool {
        self.get(kind).enabled
    }

    pub fn enabled(&self) -> impl Iterator<Item = (IndicatorKind, &ResolvedParams)> {
        self.params
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(kind, p)| (*kind, p))
    }

    /// Indicators whose configured parameters were rejected
    pub fn fallbacks(&self) -> &[IndicatorKind] {
        &self.fallbacks
    }

    /// Longest warm-up among enabled indicators
    pub fn warmup(&self) -> usize {
        self.enabled()
            .map(|(kind, p)| warmup(kind, p))
            .max()
            .unwrap_or(0)
    }
}

impl Default for EffectiveIndicatorConfig {
    fn default() -> Self {
        Self::builtin()
    }
}
