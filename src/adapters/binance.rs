use super::ExchangeAdapter;
use crate::error::FetchError;
use crate::models::{Candle, Timeframe};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

const BINANCE_API_BASE: &str = "https://api.binance.com";

/// Largest page the klines endpoint serves
const MAX_PAGE_LIMIT: usize = 1000;

const DEFAULT_MAX_PAGES: usize = 5;

/// Intervals accepted by `/api/v3/klines`
const SUPPORTED_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
];

// Binance API error codes
const ERR_INVALID_INTERVAL: i64 = -1120;
const ERR_INVALID_SYMBOL: i64 = -1121;

/// Unified symbol (`BTC/USDT`) to Binance symbol (`BTCUSDT`) lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolCatalog {
    pairs: HashMap<String, String>,
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unified: impl Into<String>, native: impl Into<String>) {
        self.pairs.insert(unified.into(), native.into());
    }

    pub fn with(mut self, unified: impl Into<String>, native: impl Into<String>) -> Self {
        self.insert(unified, native);
        self
    }

    pub fn resolve(&self, unified: &str) -> Option<&str> {
        self.pairs.get(unified).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// One parsed kline row
struct Kline {
    close_time: i64,
    candle: Candle,
}

// ============== Implementation ==============

/// Binance spot market data over the public REST API
pub struct BinanceAdapter {
    exchange_id: String,
    client: Client,
    base_url: String,
    page_limit: usize,
    max_pages: usize,
    catalog: RwLock<Option<SymbolCatalog>>,
}

impl BinanceAdapter {
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self::with_base_url(exchange_id, BINANCE_API_BASE)
    }

    pub fn with_base_url(exchange_id: impl Into<String>, base_url: &str) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            page_limit: MAX_PAGE_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
            catalog: RwLock::new(None),
        }
    }

    /// Candles per request (1..=1000) and page cap per fetch
    pub fn with_paging(mut self, page_limit: usize, max_pages: usize) -> Self {
        self.page_limit = page_limit.clamp(1, MAX_PAGE_LIMIT);
        self.max_pages = max_pages.max(1);
        self
    }

    /// Use an explicitly built catalog; unknown symbols fail without a request
    pub async fn set_catalog(&self, catalog: SymbolCatalog) {
        *self.catalog.write().await = Some(catalog);
    }

    /// Rebuild the symbol catalog from `/api/v3/exchangeInfo`
    ///
    /// Only pairs currently trading are kept. Returns the catalog size.
    pub async fn refresh_symbols(&self) -> Result<usize, FetchError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let body = self.get_text(&url, &[], "exchangeInfo").await?;

        let info: ExchangeInfo = serde_json::from_str(&body)
            .map_err(|e| FetchError::MalformedResponse(format!("exchangeInfo: {}", e)))?;

        let mut catalog = SymbolCatalog::new();
        for s in info.symbols.into_iter().filter(|s| s.status == "TRADING") {
            catalog.insert(format!("{}/{}", s.base_asset, s.quote_asset), s.symbol);
        }

        let size = catalog.len();
        *self.catalog.write().await = Some(catalog);
        tracing::info!("Loaded {} trading pairs for {}", size, self.exchange_id);
        Ok(size)
    }

    async fn native_symbol(&self, symbol: &str) -> Result<String, FetchError> {
        match self.catalog.read().await.as_ref() {
            Some(catalog) => catalog
                .resolve(symbol)
                .map(str::to_string)
                .ok_or_else(|| FetchError::UnknownSymbol(symbol.to_string())),
            None => Ok(symbol.replace('/', "").to_uppercase()),
        }
    }

    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        subject: &str,
    ) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &body, subject));
        }
        Ok(body)
    }

    async fn fetch_page(
        &self,
        native: &str,
        interval: &str,
        start: Option<i64>,
    ) -> Result<Vec<Kline>, FetchError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let mut query = vec![
            ("symbol", native.to_string()),
            ("interval", interval.to_string()),
            ("limit", self.page_limit.to_string()),
        ];
        if let Some(start) = start {
            query.push(("startTime", start.to_string()));
        }

        let body = self.get_text(&url, &query, native).await?;
        let rows: Vec<Vec<Value>> = serde_json::from_str(&body)
            .map_err(|e| FetchError::MalformedResponse(format!("klines: {}", e)))?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// Weight of one klines request at `limit`
fn klines_weight(limit: usize) -> u32 {
    match limit {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

fn interval_for(timeframe: Timeframe) -> Result<&'static str, FetchError> {
    let label = timeframe.to_string();
    SUPPORTED_INTERVALS
        .iter()
        .find(|interval| **interval == label)
        .copied()
        .ok_or_else(|| FetchError::Unsupported(format!("timeframe {} not offered", label)))
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::MalformedResponse(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

fn status_error(status: StatusCode, body: &str, subject: &str) -> FetchError {
    let api_error = serde_json::from_str::<ApiError>(body).ok();
    let message = api_error
        .as_ref()
        .map(|e| e.msg.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status.as_u16() {
        // 418 is an IP ban after ignored 429s; 403 is the WAF limit
        403 | 418 | 429 => FetchError::RateLimited(message),
        500..=599 => FetchError::Server {
            status: status.as_u16(),
            message,
        },
        _ => match api_error.map(|e| e.code) {
            Some(ERR_INVALID_SYMBOL) => FetchError::UnknownSymbol(subject.to_string()),
            Some(ERR_INVALID_INTERVAL) => FetchError::Unsupported(message),
            _ => FetchError::MalformedResponse(format!("HTTP {}: {}", status.as_u16(), message)),
        },
    }
}

fn number_field(row: &[Value], index: usize) -> Result<f64, FetchError> {
    let value = row
        .get(index)
        .ok_or_else(|| FetchError::MalformedResponse(format!("kline missing field {}", index)))?;
    let parsed = match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| FetchError::MalformedResponse(format!("kline field {} is not a number: {}", index, value)))
}

fn time_field(row: &[Value], index: usize) -> Result<i64, FetchError> {
    row.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| FetchError::MalformedResponse(format!("kline field {} is not a timestamp", index)))
}

/// `[openTime, open, high, low, close, volume, closeTime, ...]`
fn parse_kline(row: &[Value]) -> Result<Kline, FetchError> {
    Ok(Kline {
        close_time: time_field(row, 6)?,
        candle: Candle::new(
            time_field(row, 0)?,
            number_field(row, 1)?,
            number_field(row, 2)?,
            number_field(row, 3)?,
            number_field(row, 4)?,
            number_field(row, 5)?,
        ),
    })
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    /// Upper bound: every page of a paginated fetch is charged
    fn request_weight(&self, _timeframe: Timeframe) -> u32 {
        klines_weight(self.page_limit) * self.max_pages as u32
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<i64>,
    ) -> Result<Vec<Candle>, FetchError> {
        let interval = interval_for(timeframe)?;
        let native = self.native_symbol(symbol).await?;
        let now_ms = Utc::now().timestamp_millis();

        let mut candles = Vec::new();
        let mut start = since;
        for _ in 0..self.max_pages {
            let page = self.fetch_page(&native, interval, start).await?;
            let full_page = page.len() >= self.page_limit;
            let last_open = page.last().map(|k| k.candle.timestamp);

            // The newest kline is still forming until its close time passes
            candles.extend(
                page.into_iter()
                    .filter(|k| k.close_time < now_ms)
                    .map(|k| k.candle),
            );

            // Without a start time Binance returns the newest page; nothing to page forward to
            match (start, last_open) {
                (Some(_), Some(last)) if full_page => start = Some(last + timeframe.as_millis()),
                _ => break,
            }
        }

        tracing::debug!(
            "Fetched {} {} {} candles from {}",
            candles.len(),
            symbol,
            timeframe,
            self.exchange_id
        );
        Ok(candles)
    }
}
