//! Persistence seams: connectors, jobs and candle series.
//!
//! The atomic primitives (`try_acquire_rate_limit_token`,
//! `try_acquire_job_lock`, `upsert_candles`) carry the concurrency guarantees
//! of the whole pipeline; callers never read-modify-write these records.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::StoreError;
use crate::indicators::IndicatorConfig;
use crate::models::{Candle, Connector, ConnectorStatus, Job, JobId, SeriesKey};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of one rate-limit acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDecision {
    Granted { remaining: u32 },
    /// Budget spent for this period; retry after the given number of milliseconds
    Exhausted { retry_after_ms: i64 },
    /// Connector is paused or disabled
    Inactive(ConnectorStatus),
}

/// How a lock request treats the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Requires `next_run_at <= now`
    Scheduled,
    /// Manual trigger: ignores `next_run_at`, still requires an active job and a free lock
    Manual,
}

/// Proof of an exclusive, time-bounded claim on a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLease {
    pub job_id: JobId,
    pub token: Uuid,
    pub locked_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureUpdate {
    Reset,
    Increment,
    Keep,
}

impl FailureUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureUpdate::Reset => "reset",
            FailureUpdate::Increment => "increment",
            FailureUpdate::Keep => "keep",
        }
    }

    pub fn apply(&self, current: u32) -> u32 {
        match self {
            FailureUpdate::Reset => 0,
            FailureUpdate::Increment => current.saturating_add(1),
            FailureUpdate::Keep => current,
        }
    }
}

/// Run-state written when a run ends; applied only while the lease is still held
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub finished_at: DateTime<Utc>,
    /// `None` leaves the schedule untouched
    pub next_run_at: Option<DateTime<Utc>>,
    /// Newest stored candle; the cursor only moves forward
    pub cursor: Option<i64>,
    /// Marks the job `error`
    pub terminal: bool,
    pub last_error: Option<String>,
    pub last_indicator_error: Option<String>,
    pub failures: FailureUpdate,
}

/// Result of a prepend-only candle upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub stored: usize,
    /// Newest timestamp in the series after the write
    pub newest: Option<i64>,
}

#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    /// Fails with `Conflict` when the exchange is already registered
    async fn create_connector(&self, connector: &Connector) -> StoreResult<()>;

    async fn get_connector(&self, exchange: &str) -> StoreResult<Option<Connector>>;

    async fn list_connectors(&self) -> StoreResult<Vec<Connector>>;

    async fn set_connector_status(
        &self,
        exchange: &str,
        status: ConnectorStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn set_connector_indicator_config(
        &self,
        exchange: &str,
        config: &IndicatorConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Fails with `Conflict` while any job references the exchange
    async fn delete_connector(&self, exchange: &str) -> StoreResult<()>;

    /// Period rollover and test-and-increment in one atomic step
    async fn try_acquire_rate_limit_token(
        &self,
        exchange: &str,
        weight: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<TokenDecision>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Fails with `Conflict` when the (exchange, symbol, timeframe) triple exists
    async fn create_job(&self, job: &Job) -> StoreResult<()>;

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;

    async fn list_jobs(&self) -> StoreResult<Vec<Job>>;

    /// Active, due and unleased jobs, oldest `next_run_at` first
    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>>;

    async fn pause_job(&self, id: JobId, now: DateTime<Utc>) -> StoreResult<()>;

    /// Back to active and due now; clears the error and failure count
    async fn resume_job(&self, id: JobId, now: DateTime<Utc>) -> StoreResult<()>;

    async fn set_job_indicator_config(
        &self,
        id: JobId,
        config: Option<&IndicatorConfig>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Fails with `Conflict` while a lease on the job is still live at `now`
    async fn delete_job(&self, id: JobId, now: DateTime<Utc>) -> StoreResult<()>;

    /// Move an active, unleased job's `next_run_at` to `until`; `false` if it was not eligible
    async fn defer_job(&self, id: JobId, until: DateTime<Utc>, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Conditional lease: `None` when the job is missing, inactive, not due or leased
    async fn try_acquire_job_lock(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        lease: Duration,
        mode: LockMode,
    ) -> StoreResult<Option<JobLease>>;

    /// Apply `completion` and release the lock; `false` if the lease was lost
    async fn finish_run(&self, lease: &JobLease, completion: &RunCompletion) -> StoreResult<bool>;

    /// Release the lock without touching run-state; `false` if the lease was lost
    async fn release_job_lock(&self, lease: &JobLease) -> StoreResult<bool>;
}

#[async_trait]
pub trait OhlcvRepository: Send + Sync {
    /// Store the candles strictly newer than the series' newest, in any input order
    async fn upsert_candles(&self, key: &SeriesKey, candles: Vec<Candle>) -> StoreResult<UpsertOutcome>;

    async fn newest_timestamp(&self, key: &SeriesKey) -> StoreResult<Option<i64>>;

    async fn candle_count(&self, key: &SeriesKey) -> StoreResult<usize>;

    /// Up to `limit` newest candles, newest first
    async fn latest_candles(&self, key: &SeriesKey, limit: usize) -> StoreResult<Vec<Candle>>;

    /// Candles with `from <= timestamp <= to`, newest first
    async fn candle_range(&self, key: &SeriesKey, from: i64, to: i64) -> StoreResult<Vec<Candle>>;

    /// Up to `limit` candles strictly older than `before`, oldest first
    async fn candles_before(&self, key: &SeriesKey, before: i64, limit: usize) -> StoreResult<Vec<Candle>>;

    async fn delete_series(&self, key: &SeriesKey) -> StoreResult<()>;
}

/// Everything the pipeline persists
pub trait Store: ConnectorRepository + JobRepository + OhlcvRepository {}

impl<T> Store for T where T: ConnectorRepository + JobRepository + OhlcvRepository {}
