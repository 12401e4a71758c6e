//! Exchange adapters: one implementation per exchange behind [`ExchangeAdapter`],
//! looked up by exchange id through an [`AdapterRegistry`].

pub mod binance;
pub mod simulated;

pub use binance::{BinanceAdapter, SymbolCatalog};
pub use simulated::{FetchRecord, SimulatedAdapter};

use crate::error::FetchError;
use crate::models::{Candle, Timeframe};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Market-data capability of one exchange
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange id this adapter serves (matches `Connector::exchange`)
    fn exchange_id(&self) -> &str;

    /// Rate-limit weight spent by one `fetch_ohlcv` call
    fn request_weight(&self, _timeframe: Timeframe) -> u32 {
        1
    }

    /// Closed candles for `symbol`, starting at `since` (ms) or the exchange's
    /// default window when `None`. Order is not guaranteed.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
    ) -> Result<Vec<Candle>, FetchError>;
}

/// Adapters keyed by exchange id
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the adapter's own exchange id, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ExchangeAdapter>) {
        let id = adapter.exchange_id().to_string();
        if self.adapters.insert(id.clone(), adapter).is_some() {
            tracing::warn!("Replaced adapter for {}", id);
        }
    }

    pub fn with(mut self, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, exchange: &str) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.get(exchange).cloned()
    }

    pub fn contains(&self, exchange: &str) -> bool {
        self.adapters.contains_key(exchange)
    }

    pub fn exchanges(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_by_exchange_id() {
        let registry = AdapterRegistry::new()
            .with(Arc::new(SimulatedAdapter::new("binanceSim", 7)))
            .with(Arc::new(SimulatedAdapter::new("krakenSim", 7)));

        assert!(registry.contains("binanceSim"));
        assert_eq!(registry.get("krakenSim").unwrap().exchange_id(), "krakenSim");
        assert!(registry.get("coinbase").is_none());
        assert_eq!(registry.exchanges(), vec!["binanceSim", "krakenSim"]);
    }
}
