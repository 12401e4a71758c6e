use super::scheduler::Cadence;
use super::validator::CandleValidator;
use crate::adapters::AdapterRegistry;
use crate::config::ExecutorConfig;
use crate::error::{FetchError, StoreError};
use crate::indicators::{EffectiveIndicatorConfig, IndicatorConfig, IndicatorEngine};
use crate::models::{Candle, Connector, ConnectorStatus, Job, JobId};
use crate::rate_limit::{Acquisition, DenyReason, RateLimiter};
use crate::store::{FailureUpdate, JobLease, RunCompletion, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Fetched and stored; `indicator_error` is set when candles were stored without indicators
    Completed { indicator_error: Option<String> },
    /// Request budget spent; the job is due again at `retry_at`
    RateLimited { retry_at: DateTime<Utc> },
    /// Connector paused; the job is due again at its normal cadence
    ConnectorPaused,
    /// Transient fetch failures used up every attempt; due again at its normal cadence
    Deferred { error: String },
    /// This run failed; the job stays active
    Failed { error: String },
    /// Job marked `error`; no automatic runs until resumed
    Terminal { error: String },
    /// Lease expired and was taken over before the run finished; nothing recorded
    LeaseLost,
    /// Store failure; job state left as it was
    Infrastructure { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub job_id: JobId,
    pub candles_fetched: usize,
    pub candles_stored: usize,
    pub outcome: RunOutcome,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Deferred { error }
            | RunOutcome::Failed { error }
            | RunOutcome::Terminal { error }
            | RunOutcome::Infrastructure { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Progress {
    fetched: usize,
    stored: usize,
}

/// Runs one leased job: gate, fetch, validate, compute, store, reschedule
pub struct JobExecutor {
    store: Arc<dyn Store>,
    limiter: RateLimiter,
    adapters: AdapterRegistry,
    system_indicators: IndicatorConfig,
    validator: CandleValidator,
    cadence: Cadence,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn Store>, adapters: AdapterRegistry, config: ExecutorConfig) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone()),
            store,
            adapters,
            system_indicators: IndicatorConfig::default(),
            validator: CandleValidator::new(),
            cadence: Cadence::default(),
            config,
        }
    }

    /// System-wide indicator layer, below connector and job overrides
    pub fn with_indicator_defaults(mut self, indicators: IndicatorConfig) -> Self {
        self.system_indicators = indicators;
        self
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Execute one run under `lease`; never fails, every outcome is a `RunResult`
    pub async fn run(&self, job: &Job, lease: JobLease) -> RunResult {
        let span = tracing::info_span!(
            "job_run",
            job_id = %job.id,
            exchange = %job.exchange,
            symbol = %job.symbol,
            timeframe = %job.timeframe,
        );
        self.run_leased(job, lease).instrument(span).await
    }

    async fn run_leased(&self, job: &Job, lease: JobLease) -> RunResult {
        let mut progress = Progress::default();

        let outcome = match self.execute(job, &lease, &mut progress).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Run aborted by store failure: {}", err);
                // Best effort; an unreleased lease expires on its own
                if let Err(release_err) = self.store.release_job_lock(&lease).await {
                    debug!("Could not release lease: {}", release_err);
                }
                RunOutcome::Infrastructure {
                    error: err.to_string(),
                }
            }
        };

        match &outcome {
            RunOutcome::Completed { .. } => info!(
                "Run complete: fetched {}, stored {}",
                progress.fetched, progress.stored
            ),
            RunOutcome::Terminal { error } => warn!("Job disabled by terminal error: {}", error),
            other => debug!("Run ended: {:?}", other),
        }

        RunResult {
            job_id: job.id,
            candles_fetched: progress.fetched,
            candles_stored: progress.stored,
            outcome,
        }
    }

    async fn execute(
        &self,
        job: &Job,
        lease: &JobLease,
        progress: &mut Progress,
    ) -> Result<RunOutcome, StoreError> {
        let Some(connector) = self.store.get_connector(&job.exchange).await? else {
            let error = format!("connector {} is not registered", job.exchange);
            return self.terminal(job, lease, error).await;
        };
        let Some(adapter) = self.adapters.get(&job.exchange) else {
            let error = format!("no exchange adapter registered for {}", job.exchange);
            return self.terminal(job, lease, error).await;
        };

        let weight = adapter.request_weight(job.timeframe);
        let since = job.fetch_since();
        let mut attempt = 0;

        let fetched = loop {
            attempt += 1;
            let now = Utc::now();

            match self.limiter.acquire(&job.exchange, weight, now).await? {
                Acquisition::Granted { .. } => {}
                Acquisition::Denied(DenyReason::Exhausted { retry_after }) => {
                    let retry_at = now + retry_after;
                    info!("Rate limited, next attempt at {}", retry_at);
                    let completion = RunCompletion {
                        next_run_at: Some(retry_at),
                        ..self.unchanged(job, now)
                    };
                    return self
                        .finish(lease, completion, RunOutcome::RateLimited { retry_at })
                        .await;
                }
                Acquisition::Denied(DenyReason::ConnectorInactive(ConnectorStatus::Disabled)) => {
                    let error = format!("connector {} is disabled", job.exchange);
                    return self.terminal(job, lease, error).await;
                }
                Acquisition::Denied(DenyReason::ConnectorInactive(status)) => {
                    info!("Connector is {}, deferring", status);
                    let completion = RunCompletion {
                        next_run_at: Some(self.cadence.next_run_at(job.timeframe, now)),
                        ..self.unchanged(job, now)
                    };
                    return self.finish(lease, completion, RunOutcome::ConnectorPaused).await;
                }
            }

            let fetch = adapter.fetch_ohlcv(&job.symbol, job.timeframe, since);
            let result = match tokio::time::timeout(self.config.fetch_timeout(), fetch).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.config.fetch_timeout_ms)),
            };

            match result {
                Ok(candles) => break candles,
                Err(err) if err.is_retryable() && attempt < self.config.fetch_attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Fetch attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.config.fetch_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    warn!("Fetch failed after {} attempts: {}", attempt, err);
                    return self.failed(job, lease, err, true).await;
                }
                Err(err @ FetchError::MalformedResponse(_)) => {
                    return self.failed(job, lease, err, false).await;
                }
                Err(err) => return self.terminal(job, lease, err.to_string()).await,
            }
        };

        progress.fetched = fetched.len();
        let now = Utc::now();

        if let Err(err) = self
            .validator
            .validate_batch(&fetched, job.timeframe, now.timestamp_millis())
        {
            return self.failed(job, lease, err, false).await;
        }

        let batch = normalize(fetched);
        let (enriched, indicator_error) = self.compute_indicators(job, &connector, batch).await?;

        let upsert = self.store.upsert_candles(&job.series_key(), enriched).await?;
        progress.stored = upsert.stored;

        let completion = RunCompletion {
            finished_at: now,
            next_run_at: Some(self.cadence.next_run_at(job.timeframe, now)),
            cursor: if upsert.stored > 0 { upsert.newest } else { None },
            terminal: false,
            last_error: None,
            last_indicator_error: indicator_error.clone(),
            failures: FailureUpdate::Reset,
        };
        self.finish(lease, completion, RunOutcome::Completed { indicator_error })
            .await
    }

    /// Enrich `batch` using up to the configured amount of stored history as warm-up context
    ///
    /// A computation failure degrades to storing the batch without indicators.
    async fn compute_indicators(
        &self,
        job: &Job,
        connector: &Connector,
        batch: Vec<Candle>,
    ) -> Result<(Vec<Candle>, Option<String>), StoreError> {
        let no_override = IndicatorConfig::default();
        let effective = EffectiveIndicatorConfig::resolve(&[
            &self.system_indicators,
            &connector.indicator_config,
            job.indicator_config.as_ref().unwrap_or(&no_override),
        ]);
        let engine = IndicatorEngine::new(effective);

        let Some(first) = batch.first().map(|c| c.timestamp) else {
            return Ok((batch, None));
        };
        if engine.config().enabled().next().is_none() {
            return Ok((batch, None));
        }

        let wanted = self.config.indicator_context_candles.max(engine.warmup());
        let mut series = self
            .store
            .candles_before(&job.series_key(), first, wanted)
            .await?;
        let context = series.len();
        series.extend(batch);

        match engine.compute(&series) {
            Ok(mut enriched) => Ok((enriched.split_off(context), None)),
            Err(err) => {
                warn!("Indicator computation failed, storing candles without indicators: {}", err);
                let mut plain = series.split_off(context);
                for candle in &mut plain {
                    candle.indicators.clear();
                }
                Ok((plain, Some(err.to_string())))
            }
        }
    }

    /// Baseline completion: releases the lock and records the run, nothing else changes
    fn unchanged(&self, job: &Job, now: DateTime<Utc>) -> RunCompletion {
        RunCompletion {
            finished_at: now,
            next_run_at: None,
            cursor: None,
            terminal: false,
            last_error: job.run.last_error.clone(),
            last_indicator_error: job.run.last_indicator_error.clone(),
            failures: FailureUpdate::Keep,
        }
    }

    /// A failed run that leaves the job active: retried at the normal cadence
    async fn failed(
        &self,
        job: &Job,
        lease: &JobLease,
        err: FetchError,
        transient: bool,
    ) -> Result<RunOutcome, StoreError> {
        let now = Utc::now();
        let error = err.to_string();
        if !transient {
            warn!("Run failed: {}", error);
        }

        let completion = RunCompletion {
            next_run_at: Some(self.cadence.next_run_at(job.timeframe, now)),
            last_error: Some(error.clone()),
            failures: FailureUpdate::Increment,
            ..self.unchanged(job, now)
        };
        let outcome = if transient {
            RunOutcome::Deferred { error }
        } else {
            RunOutcome::Failed { error }
        };
        self.finish(lease, completion, outcome).await
    }

    /// Mark the job `error`; the schedule is left alone
    async fn terminal(
        &self,
        job: &Job,
        lease: &JobLease,
        error: String,
    ) -> Result<RunOutcome, StoreError> {
        let completion = RunCompletion {
            terminal: true,
            last_error: Some(error.clone()),
            failures: FailureUpdate::Increment,
            ..self.unchanged(job, Utc::now())
        };
        self.finish(lease, completion, RunOutcome::Terminal { error })
            .await
    }

    async fn finish(
        &self,
        lease: &JobLease,
        completion: RunCompletion,
        outcome: RunOutcome,
    ) -> Result<RunOutcome, StoreError> {
        if self.store.finish_run(lease, &completion).await? {
            Ok(outcome)
        } else {
            warn!("Lease lost before the run finished; outcome not recorded");
            Ok(RunOutcome::LeaseLost)
        }
    }
}

/// Oldest first, one candle per timestamp (first occurrence wins)
fn normalize(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}
