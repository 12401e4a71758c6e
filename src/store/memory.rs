//! In-process store behind a single mutex.
//!
//! Every operation holds the lock for its whole read-modify-write, which gives
//! the same atomicity the Postgres store gets from conditional updates. Used
//! by tests and by single-process deployments.

use super::{
    ConnectorRepository, JobLease, JobRepository, LockMode, OhlcvRepository, RunCompletion,
    StoreResult, TokenDecision, UpsertOutcome,
};
use crate::error::StoreError;
use crate::indicators::IndicatorConfig;
use crate::models::{
    Candle, CandleSeries, Connector, ConnectorStatus, Job, JobId, JobStatus, SeriesKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    connectors: HashMap<String, Connector>,
    jobs: HashMap<JobId, Job>,
    series: HashMap<SeriesKey, CandleSeries>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` (outage simulation)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

/// Rollover plus test-and-increment against one connector's counters
pub(crate) fn acquire_token(connector: &mut Connector, weight: u32, now_ms: i64) -> TokenDecision {
    if connector.status != ConnectorStatus::Active {
        return TokenDecision::Inactive(connector.status);
    }
    let policy = connector.rate_limit;
    let usage = &mut connector.usage;

    if now_ms - usage.period_start >= policy.period_ms {
        usage.used = 0;
        usage.period_start = now_ms;
    }

    if weight > policy.capacity {
        return TokenDecision::Exhausted {
            retry_after_ms: policy.period_ms,
        };
    }

    if usage.used + weight <= policy.capacity {
        usage.used += weight;
        TokenDecision::Granted {
            remaining: policy.capacity - usage.used,
        }
    } else {
        TokenDecision::Exhausted {
            retry_after_ms: (usage.period_start + policy.period_ms - now_ms).max(1),
        }
    }
}

#[async_trait]
impl ConnectorRepository for MemoryStore {
    async fn create_connector(&self, connector: &Connector) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.connectors.contains_key(&connector.exchange) {
            return Err(StoreError::Conflict(format!(
                "connector {} already exists",
                connector.exchange
            )));
        }
        state
            .connectors
            .insert(connector.exchange.clone(), connector.clone());
        Ok(())
    }

    async fn get_connector(&self, exchange: &str) -> StoreResult<Option<Connector>> {
        Ok(self.state()?.connectors.get(exchange).cloned())
    }

    async fn list_connectors(&self) -> StoreResult<Vec<Connector>> {
        let mut connectors: Vec<Connector> = self.state()?.connectors.values().cloned().collect();
        connectors.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        Ok(connectors)
    }

    async fn set_connector_status(
        &self,
        exchange: &str,
        status: ConnectorStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        let connector = state
            .connectors
            .get_mut(exchange)
            .ok_or_else(|| StoreError::not_found("connector", exchange))?;
        connector.status = status;
        connector.updated_at = now;
        Ok(())
    }

    async fn set_connector_indicator_config(
        &self,
        exchange: &str,
        config: &IndicatorConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        let connector = state
            .connectors
            .get_mut(exchange)
            .ok_or_else(|| StoreError::not_found("connector", exchange))?;
        connector.indicator_config = config.clone();
        connector.updated_at = now;
        Ok(())
    }

    async fn delete_connector(&self, exchange: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.jobs.values().any(|job| job.exchange == exchange) {
            return Err(StoreError::Conflict(format!(
                "connector {} is referenced by jobs",
                exchange
            )));
        }
        state
            .connectors
            .remove(exchange)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("connector", exchange))
    }

    async fn try_acquire_rate_limit_token(
        &self,
        exchange: &str,
        weight: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<TokenDecision> {
        let mut state = self.state()?;
        let connector = state
            .connectors
            .get_mut(exchange)
            .ok_or_else(|| StoreError::not_found("connector", exchange))?;
        Ok(acquire_token(connector, weight, now.timestamp_millis()))
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        let mut state = self.state()?;
        let key = job.series_key();
        if state.jobs.values().any(|existing| existing.series_key() == key) {
            return Err(StoreError::Conflict(format!("job for {} already exists", key)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.state()?.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.state()?.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>> {
        let mut due: Vec<Job> = self
            .state()?
            .jobs
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.run.next_run_at.cmp(&b.run.next_run_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn pause_job(&self, id: JobId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("job", id.to_string()))?;
        job.status = JobStatus::Paused;
        job.updated_at = now;
        Ok(())
    }

    async fn resume_job(&self, id: JobId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("job", id.to_string()))?;
        job.status = JobStatus::Active;
        job.run.next_run_at = now;
        job.run.last_error = None;
        job.run.consecutive_failures = 0;
        job.updated_at = now;
        Ok(())
    }

    async fn set_job_indicator_config(
        &self,
        id: JobId,
        config: Option<&IndicatorConfig>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("job", id.to_string()))?;
        job.indicator_config = config.cloned();
        job.updated_at = now;
        Ok(())
    }

    async fn delete_job(&self, id: JobId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state()?;
        match state.jobs.get(&id) {
            None => Err(StoreError::not_found("job", id.to_string())),
            Some(job) if job.is_locked(now) => {
                Err(StoreError::Conflict(format!("job {} is leased by a run", id)))
            }
            Some(_) => {
                state.jobs.remove(&id);
                Ok(())
            }
        }
    }

    async fn defer_job(&self, id: JobId, until: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state()?;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Active && !job.is_locked(now) => {
                job.run.next_run_at = until;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_acquire_job_lock(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        lease: Duration,
        mode: LockMode,
    ) -> StoreResult<Option<JobLease>> {
        let mut state = self.state()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };

        let eligible = match mode {
            LockMode::Scheduled => job.is_due(now),
            LockMode::Manual => job.status == JobStatus::Active && !job.is_locked(now),
        };
        if !eligible {
            return Ok(None);
        }

        let granted = JobLease {
            job_id: id,
            token: Uuid::new_v4(),
            locked_until: now + lease,
        };
        job.run.locked_until = Some(granted.locked_until);
        job.run.lock_token = Some(granted.token);
        Ok(Some(granted))
    }

    async fn finish_run(&self, lease: &JobLease, completion: &RunCompletion) -> StoreResult<bool> {
        let mut state = self.state()?;
        let Some(job) = state.jobs.get_mut(&lease.job_id) else {
            return Ok(false);
        };
        if job.run.lock_token != Some(lease.token) {
            return Ok(false);
        }

        job.run.locked_until = None;
        job.run.lock_token = None;
        if completion.terminal {
            job.status = JobStatus::Error;
        }
        if let Some(cursor) = completion.cursor {
            job.last_candle_time = Some(job.last_candle_time.map_or(cursor, |c| c.max(cursor)));
        }
        if let Some(next) = completion.next_run_at {
            job.run.next_run_at = next;
        }
        job.run.last_run_at = Some(completion.finished_at);
        job.run.last_error = completion.last_error.clone();
        job.run.last_indicator_error = completion.last_indicator_error.clone();
        job.run.runs_total += 1;
        job.run.consecutive_failures = completion.failures.apply(job.run.consecutive_failures);
        job.updated_at = completion.finished_at;
        Ok(true)
    }

    async fn release_job_lock(&self, lease: &JobLease) -> StoreResult<bool> {
        let mut state = self.state()?;
        match state.jobs.get_mut(&lease.job_id) {
            Some(job) if job.run.lock_token == Some(lease.token) => {
                job.run.locked_until = None;
                job.run.lock_token = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OhlcvRepository for MemoryStore {
    async fn upsert_candles(&self, key: &SeriesKey, candles: Vec<Candle>) -> StoreResult<UpsertOutcome> {
        let mut state = self.state()?;
        let series = state.series.entry(key.clone()).or_default();
        let stored = series.prepend_newer(candles);
        Ok(UpsertOutcome {
            stored,
            newest: series.newest_timestamp(),
        })
    }

    async fn newest_timestamp(&self, key: &SeriesKey) -> StoreResult<Option<i64>> {
        Ok(self
            .state()?
            .series
            .get(key)
            .and_then(CandleSeries::newest_timestamp))
    }

    async fn candle_count(&self, key: &SeriesKey) -> StoreResult<usize> {
        Ok(self.state()?.series.get(key).map_or(0, CandleSeries::len))
    }

    async fn latest_candles(&self, key: &SeriesKey, limit: usize) -> StoreResult<Vec<Candle>> {
        Ok(self
            .state()?
            .series
            .get(key)
            .map(|s| s.latest(limit).to_vec())
            .unwrap_or_default())
    }

    async fn candle_range(&self, key: &SeriesKey, from: i64, to: i64) -> StoreResult<Vec<Candle>> {
        Ok(self
            .state()?
            .series
            .get(key)
            .map(|s| s.range(from, to))
            .unwrap_or_default())
    }

    async fn candles_before(&self, key: &SeriesKey, before: i64, limit: usize) -> StoreResult<Vec<Candle>> {
        Ok(self
            .state()?
            .series
            .get(key)
            .map(|s| s.history_before(before, limit))
            .unwrap_or_default())
    }

    async fn delete_series(&self, key: &SeriesKey) -> StoreResult<()> {
        self.state()?.series.remove(key);
        Ok(())
    }
}
