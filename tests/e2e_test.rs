use candlekeeper::adapters::{AdapterRegistry, SimulatedAdapter};
use candlekeeper::config::{ExecutorConfig, SchedulerConfig};
use candlekeeper::error::FetchError;
use candlekeeper::execution::{Cadence, JobExecutor, RunOutcome, Scheduler};
use candlekeeper::indicators::{IndicatorConfig, IndicatorKind, IndicatorParams};
use candlekeeper::models::{JobStatus, NewJob, RateLimitPolicy, Timeframe};
use candlekeeper::rate_limit::RateLimiter;
use candlekeeper::service::IngestService;
use candlekeeper::store::{MemoryStore, Store};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

const EXCHANGE: &str = "binanceSim";

struct Harness {
    store: Arc<dyn Store>,
    adapter: Arc<SimulatedAdapter>,
    executor: Arc<JobExecutor>,
    service: IngestService,
}

fn harness(adapter: SimulatedAdapter) -> Harness {
    let _ = tracing_subscriber::fmt::try_init();

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let adapter = Arc::new(adapter);
    let config = ExecutorConfig {
        backoff_base_ms: 5,
        ..ExecutorConfig::default()
    };
    let executor = Arc::new(
        JobExecutor::new(store.clone(), AdapterRegistry::new().with(adapter.clone()), config)
            .with_indicator_defaults(IndicatorConfig::only(&[]))
            .with_cadence(Cadence::default()),
    );
    let service = IngestService::new(store.clone(), executor.clone(), Duration::minutes(5));
    Harness {
        store,
        adapter,
        executor,
        service,
    }
}

fn scheduler(h: &Harness) -> Scheduler {
    let config = SchedulerConfig {
        poll_interval_ms: 50,
        max_jitter_ms: 0,
        ..SchedulerConfig::default()
    };
    Scheduler::new(h.store.clone(), h.executor.clone(), config)
}

fn one_minute() -> Timeframe {
    "1m".parse().unwrap()
}

async fn register(h: &Harness, capacity: u32, period_ms: i64) {
    h.service
        .register_connector(
            EXCHANGE,
            RateLimitPolicy::new(capacity, period_ms),
            true,
            IndicatorConfig::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shared_budget_rate_limits_second_job_until_rollover() {
    // Each fetch costs the whole budget: two jobs cannot both fetch in one window
    let h = harness(SimulatedAdapter::new(EXCHANGE, 7).with_weight(2).with_backlog(30));
    register(&h, 2, 1_000).await;

    let btc = h
        .service
        .create_job(NewJob::new(EXCHANGE, "BTC/USDT", one_minute()))
        .await
        .unwrap();
    let eth = h
        .service
        .create_job(NewJob::new(EXCHANGE, "ETH/USDT", one_minute()))
        .await
        .unwrap();

    let scheduler = scheduler(&h);
    let pass = scheduler.run_once().await.unwrap();
    assert_eq!(pass.dispatched, 2);
    scheduler.wait_idle().await;

    assert_eq!(h.adapter.fetch_count(), 1, "only one job fits the budget");

    let btc_after = h.service.get_job(btc.id).await.unwrap();
    let eth_after = h.service.get_job(eth.id).await.unwrap();
    let (done, limited) = if btc_after.last_candle_time.is_some() {
        (btc_after, eth_after)
    } else {
        (eth_after, btc_after)
    };
    assert!(done.last_candle_time.is_some());
    assert!(limited.last_candle_time.is_none());
    assert_eq!(limited.status, JobStatus::Active);
    assert_eq!(limited.run.consecutive_failures, 0);
    assert!(limited.run.next_run_at <= Utc::now() + Duration::seconds(1));
    assert!(done.run.next_run_at >= Utc::now() + Duration::seconds(50));

    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

    let pass = scheduler.run_once().await.unwrap();
    assert_eq!(pass.dispatched, 1, "only the rate-limited job is due again");
    scheduler.wait_idle().await;

    assert_eq!(h.adapter.fetch_count(), 2);
    let limited = h.service.get_job(limited.id).await.unwrap();
    assert!(limited.last_candle_time.is_some());
    assert_eq!(limited.run.runs_total, 2);
}

#[tokio::test]
async fn test_concurrent_acquisitions_never_exceed_capacity_per_window() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 1));
    register(&h, 3, 60_000).await;

    let limiter = RateLimiter::new(h.store.clone());
    let mut tasks = Vec::new();
    for _ in 0..24 {
        let limiter = limiter.clone();
        tasks.push(tokio::spawn(async move {
            limiter.acquire(EXCHANGE, 1, Utc::now()).await.unwrap().is_granted()
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 3);
}

#[tokio::test]
async fn test_two_schedulers_never_run_the_same_job_twice() {
    let h = harness(
        SimulatedAdapter::new(EXCHANGE, 3)
            .with_backlog(20)
            .with_latency(std::time::Duration::from_millis(100)),
    );
    register(&h, 1_000, 1_000).await;

    let mut ids = Vec::new();
    for symbol in ["BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT", "ADA/USDT"] {
        let job = h
            .service
            .create_job(NewJob::new(EXCHANGE, symbol, one_minute()))
            .await
            .unwrap();
        ids.push(job.id);
    }

    let first = scheduler(&h);
    let second = scheduler(&h);
    let (a, b) = tokio::join!(first.run_once(), second.run_once());
    let (a, b) = (a.unwrap(), b.unwrap());
    first.wait_idle().await;
    second.wait_idle().await;

    assert_eq!(a.dispatched + b.dispatched, 5);
    assert_eq!(h.adapter.fetch_count(), 5);
    for id in ids {
        let job = h.service.get_job(id).await.unwrap();
        assert_eq!(job.run.runs_total, 1, "job {} ran more than once", id);
        assert!(job.run.locked_until.is_none());
    }
}

#[tokio::test]
async fn test_repeated_runs_do_not_duplicate_candles() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 11).with_backlog(60));
    register(&h, 100, 1_000).await;
    let job = h
        .service
        .create_job(NewJob::new(EXCHANGE, "BTC/USDT", one_minute()))
        .await
        .unwrap();
    let key = job.series_key();

    let first = h.service.trigger_run(job.id).await.unwrap();
    assert!(first.is_success(), "{:?}", first.outcome);
    assert_eq!(first.candles_stored, 60);
    let cursor = h.service.get_job(job.id).await.unwrap().last_candle_time.unwrap();

    let second = h.service.trigger_run(job.id).await.unwrap();
    assert!(second.is_success(), "{:?}", second.outcome);
    // At most the bucket that closed between the two runs
    assert!(second.candles_stored <= 1);

    let after = h.service.get_job(job.id).await.unwrap();
    assert!(after.last_candle_time.unwrap() >= cursor);

    let candles = h.service.latest_candles(&key, 500).await.unwrap();
    assert_eq!(candles.len(), first.candles_stored + second.candles_stored);
    let unique: HashSet<i64> = candles.iter().map(|c| c.timestamp).collect();
    assert_eq!(unique.len(), candles.len());

    // The incremental fetch started one interval past the cursor
    let log = h.adapter.fetch_log();
    assert_eq!(log[0].since, None);
    assert_eq!(log[1].since, Some(cursor + 60_000));
}

#[tokio::test]
async fn test_transient_failures_defer_then_recover() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 5).with_backlog(10));
    register(&h, 100, 1_000).await;
    let job = h
        .service
        .create_job(NewJob::new(EXCHANGE, "BTC/USDT", one_minute()))
        .await
        .unwrap();

    for _ in 0..3 {
        h.adapter.fail_next(FetchError::Network("connection reset".into()));
    }
    let result = h.service.trigger_run(job.id).await.unwrap();
    assert!(matches!(result.outcome, RunOutcome::Deferred { .. }), "{:?}", result.outcome);
    assert_eq!(h.adapter.fetch_count(), 3);

    let deferred = h.service.get_job(job.id).await.unwrap();
    assert_eq!(deferred.status, JobStatus::Active);
    assert_eq!(deferred.run.consecutive_failures, 1);
    assert!(deferred.run.last_error.is_some());

    let result = h.service.trigger_run(job.id).await.unwrap();
    assert!(result.is_success());
    let recovered = h.service.get_job(job.id).await.unwrap();
    assert_eq!(recovered.run.consecutive_failures, 0);
    assert!(recovered.run.last_error.is_none());
}

#[tokio::test]
async fn test_unknown_symbol_parks_job_in_error() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 5).with_symbols(&["BTC/USDT"]));
    register(&h, 100, 1_000).await;
    let job = h
        .service
        .create_job(NewJob::new(EXCHANGE, "DOGE/USDT", one_minute()))
        .await
        .unwrap();

    let result = h.service.trigger_run(job.id).await.unwrap();
    assert!(matches!(result.outcome, RunOutcome::Terminal { .. }));

    let parked = h.service.get_job(job.id).await.unwrap();
    assert_eq!(parked.status, JobStatus::Error);

    // Not picked up by the scheduler until resumed
    let pass = scheduler(&h).run_once().await.unwrap();
    assert_eq!(pass.selected, 0);
}

#[tokio::test]
async fn test_job_indicators_are_stored_with_candles() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 9).with_backlog(120));
    register(&h, 100, 1_000).await;

    let rsi = IndicatorConfig::only(&[IndicatorKind::Rsi])
        .with(IndicatorKind::Rsi, IndicatorParams::enabled().with_period(6));
    let job = h
        .service
        .create_job(NewJob::new(EXCHANGE, "BTC/USDT", one_minute()).with_indicator_config(rsi))
        .await
        .unwrap();

    let result = h.service.trigger_run(job.id).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::Completed { indicator_error: None });

    let points = h
        .service
        .indicator_series(&job.series_key(), "rsi", 50)
        .await
        .unwrap();
    assert_eq!(points.len(), 50);
    for point in &points {
        let value = point.value.expect("past the warm-up");
        assert!((0.0..=100.0).contains(&value));
    }

    // Disabled indicators are absent
    let macd = h
        .service
        .indicator_series(&job.series_key(), "macd", 5)
        .await
        .unwrap();
    assert!(macd.iter().all(|p| p.value.is_none()));
}

#[tokio::test]
async fn test_dependent_job_waits_for_parent_data() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 2).with_backlog(10));
    register(&h, 100, 1_000).await;

    let parent = h
        .service
        .create_job(NewJob::new(EXCHANGE, "BTC/USDT", one_minute()))
        .await
        .unwrap();
    h.service.pause_job(parent.id).await.unwrap();
    let child = h
        .service
        .create_job(
            NewJob::new(EXCHANGE, "BTC/USDT", "5m".parse().unwrap()).with_dependencies(vec![parent.id]),
        )
        .await
        .unwrap();

    let scheduler = scheduler(&h);
    let pass = scheduler.run_once().await.unwrap();
    assert_eq!(pass.blocked, 1);
    assert_eq!(pass.dispatched, 0);

    h.service.resume_job(parent.id).await.unwrap();
    assert!(h.service.trigger_run(parent.id).await.unwrap().is_success());

    // Blocked jobs are re-checked one poll interval later
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let pass = scheduler.run_once().await.unwrap();
    scheduler.wait_idle().await;
    assert_eq!(pass.dispatched, 1);
    assert!(h.service.get_job(child.id).await.unwrap().last_candle_time.is_some());
}

#[tokio::test]
async fn test_blocked_children_do_not_hold_up_other_jobs() {
    let h = harness(SimulatedAdapter::new(EXCHANGE, 4).with_backlog(10));
    register(&h, 100, 1_000).await;

    let parent = h
        .service
        .create_job(NewJob::new(EXCHANGE, "BTC/USDT", one_minute()))
        .await
        .unwrap();
    h.service.pause_job(parent.id).await.unwrap();
    h.service
        .create_job(
            NewJob::new(EXCHANGE, "BTC/USDT", "5m".parse().unwrap()).with_dependencies(vec![parent.id]),
        )
        .await
        .unwrap();
    let independent = h
        .service
        .create_job(NewJob::new(EXCHANGE, "ETH/USDT", one_minute()))
        .await
        .unwrap();

    let config = SchedulerConfig {
        workers: 1,
        poll_interval_ms: 50,
        max_jitter_ms: 0,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(h.store.clone(), h.executor.clone(), config);
    for _ in 0..3 {
        scheduler.run_once().await.unwrap();
        scheduler.wait_idle().await;
    }

    let ran = h.service.get_job(independent.id).await.unwrap();
    assert_eq!(ran.run.runs_total, 1);
    assert!(ran.last_candle_time.is_some());
}
