//! Application configuration.
//!
//! Sources, later ones winning: `config/default.toml` (optional), the file
//! named by `CANDLEKEEPER_CONFIG` (optional), then `CANDLEKEEPER__*`
//! environment variables with `__` between nested keys, e.g.
//! `CANDLEKEEPER__SCHEDULER__WORKERS=16`.

use crate::error::ConfigError;
use crate::indicators::IndicatorConfig;
use crate::models::Timeframe;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    /// Lock lease per run; must outlast the worst-case fetch
    pub lease_ms: u64,
    /// Concurrent runs per process
    pub workers: usize,
    /// Upper bound on the random delay added to each cadence (also capped at a tenth of the timeframe)
    pub max_jitter_ms: u64,
    /// Jobs selected per pass
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            lease_ms: 300_000,
            workers: 8,
            max_jitter_ms: 5_000,
            batch_size: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lease_ms as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub fetch_timeout_ms: u64,
    /// Fetch attempts per run, including the first
    pub fetch_attempts: u32,
    /// First retry delay; doubles on every further retry
    pub backoff_base_ms: u64,
    /// Stored candles loaded ahead of a batch so indicators start past warm-up
    pub indicator_context_candles: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 30_000,
            fetch_attempts: 3,
            backoff_base_ms: 500,
            indicator_context_candles: 300,
        }
    }
}

impl ExecutorConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Longest a run can spend fetching: every attempt timing out plus all backoff sleeps
    pub fn worst_case_fetch(&self) -> Duration {
        let retries = self.fetch_attempts.saturating_sub(1);
        let backoff: Duration = (1..=retries).map(|r| self.backoff(r)).sum();
        self.fetch_timeout() * self.fetch_attempts + backoff
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL; without one the process keeps state in memory
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "candlekeeper=info".to_string(),
            json: false,
        }
    }
}

/// Connector created at startup when missing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorSeed {
    pub exchange: String,
    pub capacity: u32,
    pub period_ms: i64,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub indicators: IndicatorConfig,
}

/// Job created at startup when missing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSeed {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub indicators: Option<IndicatorConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// System-wide indicator defaults (bottom layer of the effective config)
    pub indicators: IndicatorConfig,
    pub connectors: Vec<ConnectorSeed>,
    pub jobs: Vec<JobSeed>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/default").required(false));

        if let Ok(path) = std::env::var("CANDLEKEEPER_CONFIG") {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix("CANDLEKEEPER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        let executor = &self.executor;

        if scheduler.workers == 0 {
            return Err(ConfigError::invalid("scheduler.workers must be at least 1"));
        }
        if scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("scheduler.poll_interval_ms must be positive"));
        }
        if scheduler.batch_size == 0 {
            return Err(ConfigError::invalid("scheduler.batch_size must be at least 1"));
        }
        if executor.fetch_attempts == 0 {
            return Err(ConfigError::invalid("executor.fetch_attempts must be at least 1"));
        }
        if executor.fetch_timeout_ms == 0 {
            return Err(ConfigError::invalid("executor.fetch_timeout_ms must be positive"));
        }

        let worst_case = executor.worst_case_fetch();
        if Duration::from_millis(scheduler.lease_ms) <= worst_case {
            return Err(ConfigError::invalid(format!(
                "scheduler.lease_ms ({}) must exceed the worst-case fetch duration ({} ms)",
                scheduler.lease_ms,
                worst_case.as_millis()
            )));
        }

        for seed in &self.connectors {
            if seed.capacity == 0 || seed.period_ms <= 0 {
                return Err(ConfigError::invalid(format!(
                    "connector {} needs a positive capacity and period",
                    seed.exchange
                )));
            }
        }
        Ok(())
    }
}
