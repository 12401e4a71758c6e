use super::ExchangeAdapter;
use crate::error::FetchError;
use crate::models::{Candle, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded `fetch_ohlcv` call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRecord {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub since: Option<i64>,
    pub at: DateTime<Utc>,
}

/// Deterministic exchange for sandbox connectors and tests
///
/// Serves closed candles on the timeframe grid up to the current time. Prices
/// follow a seeded random walk anchored per (symbol, first timestamp), so the
/// same request always yields the same candles.
pub struct SimulatedAdapter {
    exchange_id: String,
    seed: u64,
    base_price: f64,
    base_volume: f64,
    /// Candles served when `since` is absent
    backlog: usize,
    weight: u32,
    latency: Option<Duration>,
    symbols: Option<HashSet<String>>,
    failures: Mutex<VecDeque<FetchError>>,
    log: Mutex<Vec<FetchRecord>>,
}

impl SimulatedAdapter {
    pub fn new(exchange_id: impl Into<String>, seed: u64) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            seed,
            base_price: 150.0,
            base_volume: 1_000_000.0,
            backlog: 500,
            weight: 1,
            latency: None,
            symbols: None,
            failures: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_backlog(mut self, candles: usize) -> Self {
        self.backlog = candles;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Delay every fetch, e.g. to exercise fetch timeouts
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Restrict the listed symbols; others fail with `UnknownSymbol`
    pub fn with_symbols(mut self, symbols: &[&str]) -> Self {
        self.symbols = Some(symbols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Make the next fetch fail with `error` (queued, one per call)
    pub fn fail_next(&self, error: FetchError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn fetch_log(&self) -> Vec<FetchRecord> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn fetch_count(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// Generate the closed candles in `[from, until)` on the timeframe grid
    pub fn generate(&self, symbol: &str, timeframe: Timeframe, from: i64, until: i64) -> Vec<Candle> {
        let step = timeframe.as_millis();
        let first = timeframe.bucket_start(from + step - 1);
        if first >= until {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(self.series_seed(symbol, first));
        let mut price = self.base_price * rng.gen_range(0.8..1.2);
        let count = ((until - first) / step) as usize;
        let mut candles = Vec::with_capacity(count);

        for i in 0..count {
            let timestamp = first + i as i64 * step;
            let open = price;
            price *= 1.0 + rng.gen_range(-0.01..0.01);
            candles.push(self.create_candle(&mut rng, timestamp, open, price));
        }
        candles
    }

    fn series_seed(&self, symbol: &str, first: i64) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        symbol.hash(&mut hasher);
        first.hash(&mut hasher);
        hasher.finish()
    }

    fn create_candle(&self, rng: &mut StdRng, timestamp: i64, open: f64, close: f64) -> Candle {
        // ±0.2% intrabar movement beyond the body
        let noise_pct = 0.002;
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..noise_pct));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..noise_pct));
        let volume = self.base_volume * rng.gen_range(0.7..1.3);
        Candle::new(timestamp, open, high, low, close, volume)
    }

    fn record(&self, symbol: &str, timeframe: Timeframe, since: Option<i64>) {
        if let Ok(mut log) = self.log.lock() {
            log.push(FetchRecord {
                symbol: symbol.to_string(),
                timeframe,
                since,
                at: Utc::now(),
            });
        }
    }

    fn next_failure(&self) -> Option<FetchError> {
        self.failures.lock().ok().and_then(|mut f| f.pop_front())
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatedAdapter {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn request_weight(&self, _timeframe: Timeframe) -> u32 {
        self.weight
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
    ) -> Result<Vec<Candle>, FetchError> {
        self.record(symbol, timeframe, since);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.next_failure() {
            return Err(error);
        }
        if let Some(symbols) = &self.symbols {
            if !symbols.contains(symbol) {
                return Err(FetchError::UnknownSymbol(symbol.to_string()));
            }
        }

        // Only buckets that have fully closed
        let until = timeframe.bucket_start(Utc::now().timestamp_millis());
        let from = since.unwrap_or(until - self.backlog as i64 * timeframe.as_millis());
        Ok(self.generate(symbol, timeframe, from, until))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf() -> Timeframe {
        "5m".parse().unwrap()
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = SimulatedAdapter::new("sim", 42).generate("SOL/USDT", tf(), 0, 300_000 * 100);
        let b = SimulatedAdapter::new("sim", 42).generate("SOL/USDT", tf(), 0, 300_000 * 100);
        let c = SimulatedAdapter::new("sim", 43).generate("SOL/USDT", tf(), 0, 300_000 * 100);

        assert_eq!(a.len(), 100);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_timestamps_on_grid_and_sequential() {
        let candles = SimulatedAdapter::new("sim", 42).generate("SOL/USDT", tf(), 1_234, 300_000 * 20);

        assert_eq!(candles[0].timestamp, 300_000);
        for pair in candles.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, 300_000);
        }
    }

    #[test]
    fn test_ohlc_consistency() {
        let candles = SimulatedAdapter::new("sim", 42).generate("SOL/USDT", tf(), 0, 300_000 * 200);

        for candle in &candles {
            assert!(candle.high >= candle.close && candle.high >= candle.open);
            assert!(candle.low <= candle.close && candle.low <= candle.open);
            assert!(candle.low > 0.0 && candle.volume > 0.0);
        }
    }

    #[tokio::test]
    async fn test_fetch_serves_only_closed_candles_and_logs() {
        let adapter = SimulatedAdapter::new("sim", 1).with_backlog(10);
        let candles = adapter.fetch_ohlcv("BTC/USDT", tf(), None).await.unwrap();

        assert_eq!(candles.len(), 10);
        let current_bucket = tf().bucket_start(Utc::now().timestamp_millis());
        assert!(candles.iter().all(|c| c.timestamp < current_bucket));
        assert_eq!(adapter.fetch_log()[0].since, None);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let adapter = SimulatedAdapter::new("sim", 1).with_backlog(3);
        adapter.fail_next(FetchError::Network("reset".into()));
        adapter.fail_next(FetchError::Timeout(100));

        assert_eq!(
            adapter.fetch_ohlcv("BTC/USDT", tf(), None).await,
            Err(FetchError::Network("reset".into()))
        );
        assert_eq!(
            adapter.fetch_ohlcv("BTC/USDT", tf(), None).await,
            Err(FetchError::Timeout(100))
        );
        assert!(adapter.fetch_ohlcv("BTC/USDT", tf(), None).await.is_ok());
        assert_eq!(adapter.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_unlisted_symbol_is_unknown() {
        let adapter = SimulatedAdapter::new("sim", 1).with_symbols(&["BTC/USDT"]);
        assert_eq!(
            adapter.fetch_ohlcv("DOGE/USDT", tf(), None).await,
            Err(FetchError::UnknownSymbol("DOGE/USDT".into()))
        );
    }
}
