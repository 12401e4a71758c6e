use super::{SeriesKey, Timeframe};
use crate::indicators::IndicatorConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    /// Terminal failure recorded; no automatic runs until resumed
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("invalid job status: {}", other)),
        }
    }
}

/// Scheduling and bookkeeping state of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    /// Lease expiry; a future value makes the job ineligible for selection
    pub locked_until: Option<DateTime<Utc>>,
    /// Token of the current lease holder
    pub lock_token: Option<Uuid>,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Last indicator computation failure (degraded runs only)
    pub last_indicator_error: Option<String>,
    pub runs_total: u64,
    /// Deferred or failed runs in a row, reset by a successful run
    pub consecutive_failures: u32,
}

impl RunState {
    pub fn due_at(next_run_at: DateTime<Utc>) -> Self {
        Self {
            locked_until: None,
            lock_token: None,
            next_run_at,
            last_run_at: None,
            last_error: None,
            last_indicator_error: None,
            runs_total: 0,
            consecutive_failures: 0,
        }
    }
}

/// Ingestion job for one (exchange, symbol, timeframe)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub status: JobStatus,
    /// Cursor: timestamp of the newest stored candle, `None` until the first successful run
    pub last_candle_time: Option<i64>,
    pub run: RunState,
    pub indicator_config: Option<IndicatorConfig>,
    #[serde(default)]
    pub depends_on: Vec<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            exchange: new.exchange,
            symbol: new.symbol,
            timeframe: new.timeframe,
            status: JobStatus::Active,
            last_candle_time: None,
            run: RunState::due_at(now),
            indicator_config: new.indicator_config,
            depends_on: new.depends_on,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.exchange.clone(), self.symbol.clone(), self.timeframe)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.run.locked_until, Some(until) if until > now)
    }

    /// Scheduler selection predicate: active, due, and not leased
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active && self.run.next_run_at <= now && !self.is_locked(now)
    }

    /// `since` for the next fetch: one interval past the cursor, or `None` for the full backlog
    pub fn fetch_since(&self) -> Option<i64> {
        self.last_candle_time
            .map(|ts| ts + self.timeframe.as_millis())
    }
}

/// Request to create a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub indicator_config: Option<IndicatorConfig>,
    #[serde(default)]
    pub depends_on: Vec<JobId>,
}

impl NewJob {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            timeframe,
            indicator_config: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_indicator_config(mut self, config: IndicatorConfig) -> Self {
        self.indicator_config = Some(config);
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<JobId>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> Job {
        let tf: Timeframe = "1m".parse().unwrap();
        Job::from_new(NewJob::new("binance", "BTC/USDT", tf), Utc::now())
    }

    #[test]
    fn test_new_job_is_due_immediately() {
        let job = job();
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.last_candle_time.is_none());
        assert!(job.is_due(Utc::now()));
    }

    #[test]
    fn test_lease_makes_job_ineligible_until_expiry() {
        let now = Utc::now();
        let mut job = job();
        job.run.locked_until = Some(now + Duration::seconds(30));

        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::seconds(30)));
    }

    #[test]
    fn test_paused_job_is_not_due() {
        let mut job = job();
        job.status = JobStatus::Paused;
        assert!(!job.is_due(Utc::now()));
    }

    #[test]
    fn test_fetch_since_follows_cursor() {
        let mut job = job();
        assert_eq!(job.fetch_since(), None);

        job.last_candle_time = Some(1_700_000_000_000);
        assert_eq!(job.fetch_since(), Some(1_700_000_060_000));
    }
}
