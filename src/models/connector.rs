use crate::indicators::IndicatorConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operational status of an exchange connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Active,
    Paused,
    Disabled,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Active => "active",
            ConnectorStatus::Paused => "paused",
            ConnectorStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConnectorStatus::Active),
            "paused" => Ok(ConnectorStatus::Paused),
            "disabled" => Ok(ConnectorStatus::Disabled),
            other => Err(format!("invalid connector status: {}", other)),
        }
    }
}

/// Request budget: at most `capacity` weight units per `period_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub capacity: u32,
    pub period_ms: i64,
}

impl RateLimitPolicy {
    pub fn new(capacity: u32, period_ms: i64) -> Self {
        Self {
            capacity,
            period_ms,
        }
    }
}

/// Usage counters for the current rate-limit period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub used: u32,
    /// Period start in milliseconds since the epoch
    pub period_start: i64,
}

impl RateLimitState {
    pub fn fresh(now_ms: i64) -> Self {
        Self {
            used: 0,
            period_start: now_ms,
        }
    }
}

/// One exchange we ingest from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub exchange: String,
    pub status: ConnectorStatus,
    pub sandbox: bool,
    pub rate_limit: RateLimitPolicy,
    pub usage: RateLimitState,
    /// Connector-level indicator defaults (middle layer of the effective config)
    #[serde(default)]
    pub indicator_config: IndicatorConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connector {
    pub fn new(exchange: impl Into<String>, rate_limit: RateLimitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            exchange: exchange.into(),
            status: ConnectorStatus::Active,
            sandbox: false,
            rate_limit,
            usage: RateLimitState::fresh(now.timestamp_millis()),
            indicator_config: IndicatorConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_indicator_config(mut self, config: IndicatorConfig) -> Self {
        self.indicator_config = config;
        self
    }
}
