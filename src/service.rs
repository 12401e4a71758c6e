//! Operations exposed to the CLI (and any outer API layer): connector and job
//! lifecycle, manual runs and read-only candle queries.

use crate::config::{ConnectorSeed, JobSeed};
use crate::error::{ServiceError, StoreError};
use crate::execution::{JobExecutor, RunResult};
use crate::indicators::{IndicatorConfig, IndicatorKind};
use crate::models::{
    Candle, Connector, ConnectorStatus, Job, JobId, NewJob, RateLimitPolicy, SeriesKey,
};
use crate::store::{LockMode, Store};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// One value of a named indicator; `None` inside the warm-up or on degenerate input
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorPoint {
    pub timestamp: i64,
    pub value: Option<f64>,
}

pub struct IngestService {
    store: Arc<dyn Store>,
    executor: Arc<JobExecutor>,
    lease: Duration,
}

impl IngestService {
    pub fn new(store: Arc<dyn Store>, executor: Arc<JobExecutor>, lease: Duration) -> Self {
        Self {
            store,
            executor,
            lease,
        }
    }

    // ============== Connectors ==============

    pub async fn register_connector(
        &self,
        exchange: &str,
        rate_limit: RateLimitPolicy,
        sandbox: bool,
        indicators: IndicatorConfig,
    ) -> ServiceResult<Connector> {
        if exchange.trim().is_empty() {
            return Err(ServiceError::Invalid("exchange id must not be empty".into()));
        }
        if rate_limit.capacity == 0 || rate_limit.period_ms <= 0 {
            return Err(ServiceError::Invalid(
                "rate limit needs a positive capacity and period".into(),
            ));
        }

        let connector = Connector::new(exchange, rate_limit, Utc::now())
            .with_sandbox(sandbox)
            .with_indicator_config(indicators);
        self.store.create_connector(&connector).await?;

        info!(
            "Registered connector {} ({} per {} ms{})",
            exchange,
            rate_limit.capacity,
            rate_limit.period_ms,
            if sandbox { ", sandbox" } else { "" }
        );
        Ok(connector)
    }

    pub async fn set_connector_status(&self, exchange: &str, status: ConnectorStatus) -> ServiceResult<()> {
        self.store
            .set_connector_status(exchange, status, Utc::now())
            .await?;
        info!("Connector {} is now {}", exchange, status);
        Ok(())
    }

    pub async fn set_connector_indicators(
        &self,
        exchange: &str,
        indicators: &IndicatorConfig,
    ) -> ServiceResult<()> {
        self.store
            .set_connector_indicator_config(exchange, indicators, Utc::now())
            .await?;
        Ok(())
    }

    /// Refused with a conflict while any job references the connector
    pub async fn delete_connector(&self, exchange: &str) -> ServiceResult<()> {
        self.store.delete_connector(exchange).await?;
        info!("Deleted connector {}", exchange);
        Ok(())
    }

    pub async fn list_connectors(&self) -> ServiceResult<Vec<Connector>> {
        Ok(self.store.list_connectors().await?)
    }

    // ============== Jobs ==============

    pub async fn create_job(&self, new: NewJob) -> ServiceResult<Job> {
        if new.symbol.trim().is_empty() {
            return Err(ServiceError::Invalid("symbol must not be empty".into()));
        }
        if self.store.get_connector(&new.exchange).await?.is_none() {
            return Err(ServiceError::Invalid(format!(
                "connector {} is not registered",
                new.exchange
            )));
        }
        if !self.executor.adapters().contains(&new.exchange) {
            return Err(ServiceError::NoAdapter(new.exchange));
        }
        for dep in &new.depends_on {
            if self.store.get_job(*dep).await?.is_none() {
                return Err(ServiceError::Invalid(format!("dependency {} does not exist", dep)));
            }
        }

        let job = Job::from_new(new, Utc::now());
        self.store.create_job(&job).await?;
        info!("Created job {} for {}", job.id, job.series_key());
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> ServiceResult<Job> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| StoreError::not_found("job", id.to_string()).into())
    }

    pub async fn list_jobs(&self) -> ServiceResult<Vec<Job>> {
        Ok(self.store.list_jobs().await?)
    }

    pub async fn pause_job(&self, id: JobId) -> ServiceResult<()> {
        self.store.pause_job(id, Utc::now()).await?;
        info!("Paused job {}", id);
        Ok(())
    }

    /// Back to active and due immediately; clears the recorded error
    pub async fn resume_job(&self, id: JobId) -> ServiceResult<()> {
        self.store.resume_job(id, Utc::now()).await?;
        info!("Resumed job {}", id);
        Ok(())
    }

    pub async fn set_job_indicators(
        &self,
        id: JobId,
        indicators: Option<&IndicatorConfig>,
    ) -> ServiceResult<()> {
        self.store
            .set_job_indicator_config(id, indicators, Utc::now())
            .await?;
        Ok(())
    }

    /// Run now regardless of `next_run_at`; the lock and rate limit still apply
    pub async fn trigger_run(&self, id: JobId) -> ServiceResult<RunResult> {
        let job = self.get_job(id).await?;
        let lease = self
            .store
            .try_acquire_job_lock(id, Utc::now(), self.lease, LockMode::Manual)
            .await?
            .ok_or_else(|| ServiceError::Busy(id.to_string()))?;

        info!("Manual run of job {}", id);
        Ok(self.executor.run(&job, lease).await)
    }

    /// Delete a job and its stored candles; refused while a run holds the lock
    pub async fn delete_job(&self, id: JobId) -> ServiceResult<()> {
        let job = self.get_job(id).await?;
        match self.store.delete_job(id, Utc::now()).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(ServiceError::Busy(id.to_string())),
            Err(err) => return Err(err.into()),
        }
        self.store.delete_series(&job.series_key()).await?;
        info!("Deleted job {} and series {}", id, job.series_key());
        Ok(())
    }

    // ============== Queries ==============

    /// Up to `limit` newest candles with indicators, newest first
    pub async fn latest_candles(&self, key: &SeriesKey, limit: usize) -> ServiceResult<Vec<Candle>> {
        Ok(self.store.latest_candles(key, limit).await?)
    }

    /// Candles with `from <= timestamp <= to`, newest first
    pub async fn candle_range(&self, key: &SeriesKey, from: i64, to: i64) -> ServiceResult<Vec<Candle>> {
        if from > to {
            return Err(ServiceError::Invalid(format!("empty range: {} > {}", from, to)));
        }
        Ok(self.store.candle_range(key, from, to).await?)
    }

    /// One indicator output (e.g. `rsi`, `macd_signal`) over the newest `limit` candles, newest first
    pub async fn indicator_series(
        &self,
        key: &SeriesKey,
        name: &str,
        limit: usize,
    ) -> ServiceResult<Vec<IndicatorPoint>> {
        if IndicatorKind::for_output_key(name).is_none() {
            return Err(ServiceError::Invalid(format!("unknown indicator output: {}", name)));
        }

        let candles = self.store.latest_candles(key, limit).await?;
        Ok(candles
            .iter()
            .map(|c| IndicatorPoint {
                timestamp: c.timestamp,
                value: c.indicator(name),
            })
            .collect())
    }

    // ============== Bootstrap ==============

    /// Create configured connectors and jobs that do not exist yet
    pub async fn bootstrap(&self, connectors: &[ConnectorSeed], jobs: &[JobSeed]) -> ServiceResult<()> {
        for seed in connectors {
            if self.store.get_connector(&seed.exchange).await?.is_none() {
                self.register_connector(
                    &seed.exchange,
                    RateLimitPolicy::new(seed.capacity, seed.period_ms),
                    seed.sandbox,
                    seed.indicators.clone(),
                )
                .await?;
            }
        }

        let existing: Vec<SeriesKey> = self
            .store
            .list_jobs()
            .await?
            .iter()
            .map(Job::series_key)
            .collect();

        for seed in jobs {
            let key = SeriesKey::new(seed.exchange.clone(), seed.symbol.clone(), seed.timeframe);
            if existing.contains(&key) {
                continue;
            }
            let mut new = NewJob::new(&seed.exchange, &seed.symbol, seed.timeframe);
            new.indicator_config = seed.indicators.clone();
            self.create_job(new).await?;
        }
        Ok(())
    }
}
