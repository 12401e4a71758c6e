pub mod connector;
pub mod job;
pub mod timeframe;

pub use connector::{Connector, ConnectorStatus, RateLimitPolicy, RateLimitState};
pub use job::{Job, JobId, JobStatus, NewJob, RunState};
pub use timeframe::Timeframe;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// OHLCV candlestick for one time bucket, plus derived indicator values
///
/// `timestamp` is the bucket open time in milliseconds since the epoch.
/// Indicators without a value for this candle (warm-up, degenerate input)
/// are simply absent from the map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indicators: BTreeMap<String, f64>,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
        }
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }
}

/// Identity of a stored series: one per (exchange, symbol, timeframe)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// All candles stored for one series, newest first
///
/// Invariant: `candles[i].timestamp > candles[i + 1].timestamp` for every `i`.
/// The only mutation is [`CandleSeries::prepend_newer`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn newest_timestamp(&self) -> Option<i64> {
        self.candles.first().map(|c| c.timestamp)
    }

    /// Candles newest first
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Prepend the candles strictly newer than the current newest
    ///
    /// Input order does not matter. Candles at or below the current newest
    /// timestamp are dropped (first write wins), as are duplicate timestamps
    /// within the batch. Returns the number of candles stored.
    pub fn prepend_newer(&mut self, batch: Vec<Candle>) -> usize {
        let fresh = newer_than(batch, self.newest_timestamp());
        let stored = fresh.len();
        if stored > 0 {
            let mut merged = fresh;
            merged.append(&mut self.candles);
            self.candles = merged;
        }
        stored
    }

    /// Up to `limit` most recent candles, newest first
    pub fn latest(&self, limit: usize) -> &[Candle] {
        &self.candles[..limit.min(self.candles.len())]
    }

    /// Candles with `from <= timestamp <= to`, newest first
    pub fn range(&self, from: i64, to: i64) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp <= to)
            .cloned()
            .collect()
    }

    /// Up to `limit` candles strictly older than `before`, oldest first
    pub fn history_before(&self, before: i64, limit: usize) -> Vec<Candle> {
        let mut history: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.timestamp < before)
            .take(limit)
            .cloned()
            .collect();
        history.reverse();
        history
    }
}

/// Reduce a batch to the candles newer than `newest`, newest first, one per timestamp
///
/// When the batch holds the same timestamp twice the first occurrence is kept.
pub fn newer_than(mut batch: Vec<Candle>, newest: Option<i64>) -> Vec<Candle> {
    if let Some(newest) = newest {
        batch.retain(|c| c.timestamp > newest);
    }
    // Stable sort keeps the first occurrence of a timestamp ahead of later ones
    batch.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    batch.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle::new(ts, close, close + 1.0, close - 1.0, close, 10.0)
    }

    fn assert_strictly_decreasing(series: &CandleSeries) {
        for pair in series.candles().windows(2) {
            assert!(pair[0].timestamp > pair[1].timestamp);
        }
    }

    #[test]
    fn test_prepend_into_empty_series() {
        let mut series = CandleSeries::new();
        let stored = series.prepend_newer(vec![candle(1, 1.0), candle(2, 2.0), candle(3, 3.0)]);

        assert_eq!(stored, 3);
        assert_eq!(series.newest_timestamp(), Some(3));
        assert_strictly_decreasing(&series);
    }

    #[test]
    fn test_prepend_drops_already_stored_timestamps() {
        let mut series = CandleSeries::new();
        series.prepend_newer(vec![candle(1, 1.0), candle(2, 2.0)]);

        // Overlapping window: 2 is already stored with close 2.0
        let stored = series.prepend_newer(vec![candle(2, 99.0), candle(3, 3.0)]);

        assert_eq!(stored, 1);
        assert_eq!(series.len(), 3);
        let two = series.candles().iter().find(|c| c.timestamp == 2).unwrap();
        assert_eq!(two.close, 2.0, "first write for a timestamp is final");
        assert_strictly_decreasing(&series);
    }

    #[test]
    fn test_prepend_same_batch_twice_is_idempotent() {
        let mut series = CandleSeries::new();
        let batch = vec![candle(10, 1.0), candle(20, 2.0), candle(30, 3.0)];
        series.prepend_newer(batch.clone());
        let before = series.clone();

        assert_eq!(series.prepend_newer(batch), 0);
        assert_eq!(series, before);
    }

    #[test]
    fn test_prepend_ignores_older_gap_fill() {
        let mut series = CandleSeries::new();
        series.prepend_newer(vec![candle(10, 1.0), candle(30, 3.0)]);

        // 20 is older than the newest; prepend-only never inserts in the middle
        assert_eq!(series.prepend_newer(vec![candle(20, 2.0)]), 0);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_prepend_dedups_within_batch() {
        let mut series = CandleSeries::new();
        let stored = series.prepend_newer(vec![candle(5, 1.0), candle(5, 2.0), candle(4, 0.5)]);

        assert_eq!(stored, 2);
        assert_eq!(series.candles()[0].close, 1.0);
        assert_strictly_decreasing(&series);
    }

    #[test]
    fn test_ordering_invariant_over_many_upserts() {
        let mut series = CandleSeries::new();
        for round in 0..20i64 {
            // Overlapping, shuffled windows
            let batch: Vec<Candle> = [3, 0, 2, 1, 4]
                .iter()
                .map(|offset| candle(round * 3 + offset, round as f64))
                .collect();
            series.prepend_newer(batch);
            assert_strictly_decreasing(&series);
        }
        assert_eq!(series.newest_timestamp(), Some(19 * 3 + 4));
    }

    #[test]
    fn test_range_and_history() {
        let mut series = CandleSeries::new();
        series.prepend_newer((1..=10).map(|ts| candle(ts, ts as f64)).collect());

        let range = series.range(3, 5);
        assert_eq!(range.iter().map(|c| c.timestamp).collect::<Vec<_>>(), vec![5, 4, 3]);

        let history = series.history_before(8, 3);
        assert_eq!(history.iter().map(|c| c.timestamp).collect::<Vec<_>>(), vec![5, 6, 7]);

        assert_eq!(series.latest(2).len(), 2);
        assert_eq!(series.latest(50).len(), 10);
    }

    #[test]
    fn test_absent_indicators_are_not_serialized() {
        let json = serde_json::to_string(&candle(1, 1.0)).unwrap();
        assert!(!json.contains("indicators"));
    }
}
