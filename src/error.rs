//! Error types shared across the ingestion pipeline.
//!
//! Each layer has its own enum so callers can classify failures
//! (retryable fetch errors vs. terminal ones, infrastructure vs. domain).

use thiserror::Error;

/// Failures reported by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing store cannot be reached or rejected the round-trip
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Uniqueness or referential constraint violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                key: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Failures reported by an exchange adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    /// 5xx-equivalent response from the exchange
    #[error("exchange server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The exchange itself throttled us (429/418)
    #[error("rate limited by exchange: {0}")]
    RateLimited(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Request the exchange cannot serve, e.g. a timeframe it does not offer
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// Timeouts, network and server errors are worth retrying within a run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_)
                | FetchError::Network(_)
                | FetchError::Server { .. }
                | FetchError::RateLimited(_)
        )
    }
}

/// Input rejected by the indicator engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("candles must be strictly ascending by timestamp (index {index})")]
    Unordered { index: usize },

    #[error("non-finite {field} at timestamp {timestamp}")]
    NonFinite { field: &'static str, timestamp: i64 },
}

/// Failures of the operations exposed to the API/CLI layer.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("no exchange adapter registered for {0}")]
    NoAdapter(String),

    /// The job is currently leased by another run (or not eligible)
    #[error("job {0} is busy or not runnable")]
    Busy(String),
}

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
