// Technical indicators module
// Configurable battery of 30 indicators computed in one pass over a candle series

pub mod adx;
pub mod atr;
pub mod bands;
pub mod config;
pub mod engine;
pub mod moving_average;
pub mod oscillators;
pub mod rsi;
pub mod smoothing;
pub mod source;
pub mod trend;
pub mod volume;

pub use config::{
    EffectiveIndicatorConfig, IndicatorConfig, IndicatorKind, IndicatorParams, ResolvedParams,
};
pub use engine::IndicatorEngine;
pub use source::PriceSource;
