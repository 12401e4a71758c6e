//! Pure indicator computation over an ordered candle series.
//!
//! One pass computes every enabled indicator. Intermediate series (price
//! sources, EMAs, ATR, RSI) are computed once per pass and shared, so MACD
//! reuses the same EMAs the `ema` indicator would produce for those periods.

use super::adx::calculate_adx;
use super::atr::{calculate_atr, calculate_natr};
use super::bands::{calculate_bollinger, calculate_donchian, calculate_keltner};
use super::config::{EffectiveIndicatorConfig, IndicatorKind, ResolvedParams};
use super::moving_average::{
    calculate_dema, calculate_ema, calculate_macd, calculate_ppo, calculate_sma, calculate_tema,
    calculate_trix, calculate_wma,
};
use super::oscillators::{
    calculate_awesome_oscillator, calculate_cci, calculate_momentum, calculate_roc,
    calculate_stoch, calculate_williams_r,
};
use super::rsi::{calculate_rsi, calculate_stoch_rsi};
use super::smoothing::{finite, lift, stddev};
use super::source::PriceSource;
use super::trend::{calculate_aroon, calculate_psar};
use super::volume::{calculate_ad, calculate_cmf, calculate_mfi, calculate_obv, calculate_vwap};
use crate::error::IndicatorError;
use crate::models::Candle;
use std::collections::HashMap;
use std::rc::Rc;

type Series = Rc<Vec<Option<f64>>>;

/// Computes the enabled indicators of one effective configuration
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: EffectiveIndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: EffectiveIndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EffectiveIndicatorConfig {
        &self.config
    }

    /// Candles of history needed before the first fully warmed-up value
    pub fn warmup(&self) -> usize {
        self.config.warmup()
    }

    /// Enrich `candles` (oldest first, strictly ascending) with indicator values
    ///
    /// The returned candles carry exactly the values computed in this pass:
    /// any previous indicator map is replaced, and warm-up or degenerate slots
    /// are left out rather than stored as zero or NaN.
    pub fn compute(&self, candles: &[Candle]) -> Result<Vec<Candle>, IndicatorError> {
        check_series(candles)?;

        let mut pass = Pass::new(candles);
        let mut outputs: Vec<(&'static str, Series)> = Vec::new();
        for (kind, params) in self.config.enabled() {
            outputs.extend(pass.compute(kind, params));
        }

        let mut enriched = candles.to_vec();
        for (i, candle) in enriched.iter_mut().enumerate() {
            candle.indicators.clear();
            for (key, series) in &outputs {
                if let Some(value) = series.get(i).copied().flatten().and_then(finite) {
                    candle.indicators.insert((*key).to_string(), value);
                }
            }
        }
        Ok(enriched)
    }
}

fn check_series(candles: &[Candle]) -> Result<(), IndicatorError> {
    for (index, candle) in candles.iter().enumerate() {
        if index > 0 && candle.timestamp <= candles[index - 1].timestamp {
            return Err(IndicatorError::Unordered { index });
        }
        let fields = [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
            ("volume", candle.volume),
        ];
        if let Some(&(field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(IndicatorError::NonFinite {
                field,
                timestamp: candle.timestamp,
            });
        }
    }
    Ok(())
}

/// Shared intermediates of one computation pass
struct Pass<'a> {
    candles: &'a [Candle],
    sources: HashMap<PriceSource, Rc<Vec<f64>>>,
    emas: HashMap<(PriceSource, usize), Series>,
    rsis: HashMap<(PriceSource, usize), Series>,
    atrs: HashMap<usize, Series>,
}

impl<'a> Pass<'a> {
    fn new(candles: &'a [Candle]) -> Self {
        Self {
            candles,
            sources: HashMap::new(),
            emas: HashMap::new(),
            rsis: HashMap::new(),
            atrs: HashMap::new(),
        }
    }

    fn source(&mut self, source: PriceSource) -> Rc<Vec<f64>> {
        let candles = self.candles;
        self.sources
            .entry(source)
            .or_insert_with(|| Rc::new(source.extract(candles)))
            .clone()
    }

    fn ema(&mut self, source: PriceSource, period: usize) -> Series {
        if let Some(series) = self.emas.get(&(source, period)) {
            return series.clone();
        }
        let series = Rc::new(calculate_ema(&self.source(source), period));
        self.emas.insert((source, period), series.clone());
        series
    }

    fn rsi(&mut self, source: PriceSource, period: usize) -> Series {
        if let Some(series) = self.rsis.get(&(source, period)) {
            return series.clone();
        }
        let series = Rc::new(calculate_rsi(&self.source(source), period));
        self.rsis.insert((source, period), series.clone());
        series
    }

    fn atr(&mut self, period: usize) -> Series {
        let candles = self.candles;
        self.atrs
            .entry(period)
            .or_insert_with(|| Rc::new(calculate_atr(candles, period)))
            .clone()
    }

    fn compute(&mut self, kind: IndicatorKind, p: &ResolvedParams) -> Vec<(&'static str, Series)> {
        let candles = self.candles;
        let n = p.period;
        let single = |series: Vec<Option<f64>>| vec![(kind.name(), Rc::new(series))];

        match kind {
            IndicatorKind::Sma => single(calculate_sma(&self.source(p.source), n)),
            IndicatorKind::Ema => vec![("ema", self.ema(p.source, n))],
            IndicatorKind::Wma => single(calculate_wma(&self.source(p.source), n)),
            IndicatorKind::Dema => single(calculate_dema(&self.ema(p.source, n), n)),
            IndicatorKind::Tema => single(calculate_tema(&self.ema(p.source, n), n)),
            IndicatorKind::Macd => {
                let fast = self.ema(p.source, p.fast_period);
                let slow = self.ema(p.source, p.slow_period);
                let macd = calculate_macd(&fast, &slow, p.signal_period);
                vec![
                    ("macd", Rc::new(macd.macd)),
                    ("macd_signal", Rc::new(macd.signal)),
                    ("macd_histogram", Rc::new(macd.histogram)),
                ]
            }
            IndicatorKind::Ppo => {
                let fast = self.ema(p.source, p.fast_period);
                let slow = self.ema(p.source, p.slow_period);
                single(calculate_ppo(&fast, &slow))
            }
            IndicatorKind::Trix => single(calculate_trix(&self.ema(p.source, n), n)),
            IndicatorKind::Rsi => vec![("rsi", self.rsi(p.source, n))],
            IndicatorKind::StochRsi => single(calculate_stoch_rsi(&self.rsi(p.source, n), n)),
            IndicatorKind::Stoch => {
                let stoch = calculate_stoch(candles, n, p.signal_period);
                vec![("stoch_k", Rc::new(stoch.k)), ("stoch_d", Rc::new(stoch.d))]
            }
            IndicatorKind::WilliamsR => single(calculate_williams_r(candles, n)),
            IndicatorKind::Cci => single(calculate_cci(&self.source(p.source), n)),
            IndicatorKind::Roc => single(calculate_roc(&self.source(p.source), n)),
            IndicatorKind::Momentum => single(calculate_momentum(&self.source(p.source), n)),
            IndicatorKind::Mfi => {
                single(calculate_mfi(candles, &self.source(PriceSource::Hlc3), n))
            }
            IndicatorKind::AwesomeOscillator => single(calculate_awesome_oscillator(
                &self.source(p.source),
                p.fast_period,
                p.slow_period,
            )),
            IndicatorKind::Adx => {
                let adx = calculate_adx(candles, n);
                vec![
                    ("adx", Rc::new(adx.adx)),
                    ("plus_di", Rc::new(adx.plus_di)),
                    ("minus_di", Rc::new(adx.minus_di)),
                ]
            }
            IndicatorKind::Aroon => {
                let aroon = calculate_aroon(candles, n);
                vec![
                    ("aroon_up", Rc::new(aroon.up)),
                    ("aroon_down", Rc::new(aroon.down)),
                ]
            }
            IndicatorKind::Psar => {
                single(calculate_psar(candles, p.acceleration, p.max_acceleration))
            }
            IndicatorKind::Atr => vec![("atr", self.atr(n))],
            IndicatorKind::Natr => single(calculate_natr(candles, &self.atr(n))),
            IndicatorKind::Bollinger => {
                let bb = calculate_bollinger(&self.source(p.source), n, p.multiplier);
                vec![
                    ("bb_upper", Rc::new(bb.bands.upper)),
                    ("bb_middle", Rc::new(bb.bands.middle)),
                    ("bb_lower", Rc::new(bb.bands.lower)),
                    ("bb_percent_b", Rc::new(bb.percent_b)),
                ]
            }
            IndicatorKind::Keltner => {
                let kc = calculate_keltner(&self.ema(p.source, n), &self.atr(n), p.multiplier);
                vec![
                    ("kc_upper", Rc::new(kc.upper)),
                    ("kc_middle", Rc::new(kc.middle)),
                    ("kc_lower", Rc::new(kc.lower)),
                ]
            }
            IndicatorKind::Donchian => {
                let dc = calculate_donchian(candles, n);
                vec![
                    ("dc_upper", Rc::new(dc.upper)),
                    ("dc_middle", Rc::new(dc.middle)),
                    ("dc_lower", Rc::new(dc.lower)),
                ]
            }
            IndicatorKind::Stddev => single(stddev(&lift(&self.source(p.source)), n)),
            IndicatorKind::Obv => single(calculate_obv(candles)),
            IndicatorKind::Vwap => single(calculate_vwap(candles, &self.source(p.source), n)),
            IndicatorKind::Cmf => single(calculate_cmf(candles, n)),
            IndicatorKind::Ad => single(calculate_ad(candles)),
        }
    }
}
