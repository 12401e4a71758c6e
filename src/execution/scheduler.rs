use super::executor::JobExecutor;
use crate::config::SchedulerConfig;
use crate::error::StoreError;
use crate::models::{Job, JobStatus, Timeframe};
use crate::store::{LockMode, Store};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Next-run computation: one timeframe later plus bounded random jitter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cadence {
    max_jitter_ms: i64,
}

impl Cadence {
    pub fn new(max_jitter_ms: u64) -> Self {
        Self {
            max_jitter_ms: i64::try_from(max_jitter_ms).unwrap_or(i64::MAX),
        }
    }

    /// Jitter is drawn from `0..=min(max_jitter, timeframe / 10)`
    pub fn next_run_at(&self, timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
        let cap = self.max_jitter_ms.min(timeframe.as_millis() / 10);
        let jitter = if cap > 0 {
            rand::thread_rng().gen_range(0..=cap)
        } else {
            0
        };
        now + timeframe.as_duration() + Duration::milliseconds(jitter)
    }
}

/// What one selection pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub selected: usize,
    pub dispatched: usize,
    /// Skipped because a dependency has not produced data yet
    pub blocked: usize,
    /// Lost the lock race to another scheduler
    pub contended: usize,
}

/// Polls for due jobs and dispatches them to a bounded worker pool
pub struct Scheduler {
    store: Arc<dyn Store>,
    executor: Arc<JobExecutor>,
    config: SchedulerConfig,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, executor: Arc<JobExecutor>, config: SchedulerConfig) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(config.workers)),
            store,
            executor,
            config,
        }
    }

    /// Poll until `shutdown` flips to `true`, then wait for in-flight runs
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started: {} workers, polling every {:?}",
            self.config.workers,
            self.config.poll_interval()
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(summary) if summary.selected > 0 => debug!("Scheduler pass: {:?}", summary),
                        Ok(_) => {}
                        Err(err) => error!("Scheduler pass failed: {}", err),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopping, waiting for {} in-flight runs", self.in_flight());
        self.wait_idle().await;
        info!("Scheduler stopped");
    }

    /// One selection pass: lock and dispatch due jobs while workers are free
    ///
    /// Jobs blocked on a dependency take no worker and are re-checked one poll
    /// interval later, behind every job that is already due.
    /// Dispatched runs continue in the background; see [`Scheduler::wait_idle`].
    pub async fn run_once(&self) -> Result<PassSummary, StoreError> {
        let mut summary = PassSummary::default();
        if self.workers.available_permits() == 0 {
            return Ok(summary);
        }

        let now = Utc::now();
        let due = self.store.due_jobs(now, self.config.batch_size).await?;
        summary.selected = due.len();

        for job in due {
            if !self.dependencies_ready(&job).await? {
                debug!("Job {} waiting on dependencies", job.id);
                let recheck = now + Duration::milliseconds(self.config.poll_interval_ms as i64);
                self.store.defer_job(job.id, recheck, now).await?;
                summary.blocked += 1;
                continue;
            }

            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                break;
            };

            let Some(lease) = self
                .store
                .try_acquire_job_lock(job.id, now, self.config.lease(), LockMode::Scheduled)
                .await?
            else {
                summary.contended += 1;
                continue;
            };

            let executor = self.executor.clone();
            tokio::spawn(async move {
                let _permit = permit;
                executor.run(&job, lease).await;
            });
            summary.dispatched += 1;
        }

        Ok(summary)
    }

    /// Runs currently executing in this process
    pub fn in_flight(&self) -> usize {
        self.config.workers - self.workers.available_permits()
    }

    /// Wait until every dispatched run has finished
    pub async fn wait_idle(&self) {
        let all = u32::try_from(self.config.workers).unwrap_or(u32::MAX);
        if let Ok(permits) = self.workers.acquire_many(all).await {
            drop(permits);
        }
    }

    /// A job runs only after each dependency has stored data and is not in `error`
    async fn dependencies_ready(&self, job: &Job) -> Result<bool, StoreError> {
        for dep in &job.depends_on {
            match self.store.get_job(*dep).await? {
                Some(parent) => {
                    if parent.status == JobStatus::Error || parent.last_candle_time.is_none() {
                        return Ok(false);
                    }
                }
                None => warn!("Job {} depends on missing job {}; ignoring", job.id, dep),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::{AdapterRegistry, SimulatedAdapter};
    use crate::config::ExecutorConfig;
    use crate::models::{Connector, NewJob, RateLimitPolicy};
    use crate::store::{ConnectorRepository, JobRepository, MemoryStore};

    #[tokio::test]
    async fn test_blocked_jobs_do_not_starve_independent_ones() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .create_connector(&Connector::new("sim", RateLimitPolicy::new(100, 1_000), now))
            .await
            .unwrap();

        let tf: Timeframe = "1m".parse().unwrap();
        let mut parent = Job::from_new(NewJob::new("sim", "BTC/USDT", tf), now);
        parent.status = JobStatus::Paused;
        store.create_job(&parent).await.unwrap();

        // Older next_run_at: sorts ahead of the independent job
        let child = Job::from_new(
            NewJob::new("sim", "BTC/USDT", "5m".parse().unwrap()).with_dependencies(vec![parent.id]),
            now - Duration::minutes(1),
        );
        store.create_job(&child).await.unwrap();

        let independent = Job::from_new(NewJob::new("sim", "ETH/USDT", tf), now);
        store.create_job(&independent).await.unwrap();

        let adapters = AdapterRegistry::new().with(Arc::new(SimulatedAdapter::new("sim", 1).with_backlog(5)));
        let executor = Arc::new(JobExecutor::new(store.clone(), adapters, ExecutorConfig::default()));
        let config = SchedulerConfig {
            workers: 1,
            max_jitter_ms: 0,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(store.clone(), executor, config);

        let pass = scheduler.run_once().await.unwrap();
        scheduler.wait_idle().await;
        assert_eq!(pass.blocked, 1);
        assert_eq!(pass.dispatched, 1);

        let ran = store.get_job(independent.id).await.unwrap().unwrap();
        assert_eq!(ran.run.runs_total, 1);
        assert!(ran.last_candle_time.is_some());

        let waiting = store.get_job(child.id).await.unwrap().unwrap();
        assert_eq!(waiting.run.runs_total, 0);
        assert!(waiting.run.next_run_at > now);
    }

    #[test]
    fn test_cadence_without_jitter_is_one_timeframe() {
        let now = Utc::now();
        let tf: Timeframe = "5m".parse().unwrap();
        assert_eq!(Cadence::default().next_run_at(tf, now), now + Duration::minutes(5));
    }

    #[test]
    fn test_cadence_jitter_is_bounded_by_timeframe() {
        let now = Utc::now();
        let tf: Timeframe = "1m".parse().unwrap();
        let cadence = Cadence::new(60_000);

        for _ in 0..200 {
            let next = cadence.next_run_at(tf, now);
            assert!(next >= now + Duration::minutes(1));
            // capped at a tenth of the timeframe, not the configured 60 s
            assert!(next <= now + Duration::minutes(1) + Duration::seconds(6));
        }
    }

    #[test]
    fn test_cadence_jitter_is_bounded_by_config() {
        let now = Utc::now();
        let tf: Timeframe = "1d".parse().unwrap();
        let cadence = Cadence::new(500);

        for _ in 0..200 {
            let next = cadence.next_run_at(tf, now);
            assert!(next <= now + Duration::days(1) + Duration::milliseconds(500));
        }
    }
}
