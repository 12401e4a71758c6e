use anyhow::{bail, Context};
use candlekeeper::adapters::{AdapterRegistry, BinanceAdapter, SimulatedAdapter};
use candlekeeper::config::{AppConfig, ConnectorSeed};
use candlekeeper::execution::{Cadence, JobExecutor, Scheduler};
use candlekeeper::indicators::IndicatorConfig;
use candlekeeper::logging::init_logging;
use candlekeeper::models::{ConnectorStatus, JobId, NewJob, RateLimitPolicy, SeriesKey, Timeframe};
use candlekeeper::service::IngestService;
use candlekeeper::store::{MemoryStore, PostgresStore, Store};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "candlekeeper", version, about = "Rate-limited OHLCV ingestion with technical indicators")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// Manage exchange connectors
    Connector {
        #[command(subcommand)]
        action: ConnectorCommand,
    },
    /// Manage ingestion jobs
    Job {
        #[command(subcommand)]
        action: JobCommand,
    },
    /// Query stored candles
    Candles {
        #[command(subcommand)]
        action: CandlesCommand,
    },
}

#[derive(Subcommand)]
enum ConnectorCommand {
    Add {
        exchange: String,
        /// Request weight allowed per period
        #[arg(long)]
        capacity: u32,
        #[arg(long)]
        period_ms: i64,
        /// Serve this connector from the simulated exchange
        #[arg(long)]
        sandbox: bool,
        /// Default indicator configuration as JSON
        #[arg(long)]
        indicators: Option<String>,
    },
    Status {
        exchange: String,
        /// active, paused or disabled
        status: ConnectorStatus,
    },
    Delete {
        exchange: String,
    },
    List,
}

#[derive(Subcommand)]
enum JobCommand {
    Create {
        #[command(flatten)]
        series: SeriesArgs,
        /// Indicator override as JSON, e.g. '{"rsi":{"period":6}}'
        #[arg(long)]
        indicators: Option<String>,
        /// Jobs that must have data before this one runs
        #[arg(long = "depends-on")]
        depends_on: Vec<JobId>,
    },
    Pause {
        id: JobId,
    },
    Resume {
        id: JobId,
    },
    /// Run now, ignoring the schedule
    Trigger {
        id: JobId,
    },
    Delete {
        id: JobId,
    },
    List,
}

#[derive(Subcommand)]
enum CandlesCommand {
    Latest {
        #[command(flatten)]
        series: SeriesArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    Range {
        #[command(flatten)]
        series: SeriesArgs,
        /// Inclusive start, ms since epoch
        #[arg(long)]
        from: i64,
        /// Inclusive end, ms since epoch
        #[arg(long)]
        to: i64,
    },
    Indicator {
        #[command(flatten)]
        series: SeriesArgs,
        /// Output key, e.g. rsi, macd_signal, bb_upper
        name: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Args)]
struct SeriesArgs {
    #[arg(long)]
    exchange: String,
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    timeframe: Timeframe,
}

impl SeriesArgs {
    fn key(&self) -> SeriesKey {
        SeriesKey::new(self.exchange.clone(), self.symbol.clone(), self.timeframe)
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.logging);

    if let Command::Migrate = cli.command {
        let Some(url) = &config.database.url else {
            bail!("database.url is not configured");
        };
        PostgresStore::connect(url, config.database.max_connections)
            .await
            .context("failed to migrate database")?;
        tracing::info!("Migrations applied");
        return Ok(());
    }

    let store = connect_store(&config).await?;
    let registry = build_registry(store.as_ref(), &config.connectors).await?;
    let executor = Arc::new(
        JobExecutor::new(store.clone(), registry, config.executor.clone())
            .with_indicator_defaults(config.indicators.clone())
            .with_cadence(Cadence::new(config.scheduler.max_jitter_ms)),
    );
    let service = IngestService::new(store.clone(), executor.clone(), config.scheduler.lease());

    match cli.command {
        Command::Run => {
            service
                .bootstrap(&config.connectors, &config.jobs)
                .await
                .context("failed to create configured connectors and jobs")?;
            run_scheduler(store, executor, &config).await?;
        }
        Command::Migrate => {}
        Command::Connector { action } => connector_command(&service, action).await?,
        Command::Job { action } => job_command(&service, action).await?,
        Command::Candles { action } => candles_command(&service, action).await?,
    }

    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database.max_connections)
                .await
                .context("failed to connect to Postgres")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No database.url configured, keeping state in memory (lost on exit)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// One adapter per known connector: sandbox connectors get the simulated exchange
async fn build_registry(store: &dyn Store, seeds: &[ConnectorSeed]) -> anyhow::Result<AdapterRegistry> {
    let mut exchanges: BTreeMap<String, bool> = store
        .list_connectors()
        .await
        .context("failed to list connectors")?
        .into_iter()
        .map(|c| (c.exchange, c.sandbox))
        .collect();
    for seed in seeds {
        exchanges.entry(seed.exchange.clone()).or_insert(seed.sandbox);
    }

    let mut registry = AdapterRegistry::new();
    for (exchange, sandbox) in exchanges {
        if sandbox {
            registry.register(Arc::new(SimulatedAdapter::new(&exchange, seed_for(&exchange))));
        } else if exchange.starts_with("binance") {
            let adapter = BinanceAdapter::new(&exchange);
            if let Err(e) = adapter.refresh_symbols().await {
                tracing::warn!("Could not load {} symbol catalog ({}), using raw symbols", exchange, e);
            }
            registry.register(Arc::new(adapter));
        } else {
            tracing::warn!("No adapter available for {}; its jobs will fail", exchange);
        }
    }
    Ok(registry)
}

fn seed_for(exchange: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    exchange.hash(&mut hasher);
    hasher.finish()
}

async fn run_scheduler(
    store: Arc<dyn Store>,
    executor: Arc<JobExecutor>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    tracing::info!("🚀 candlekeeper starting");

    let scheduler = Arc::new(Scheduler::new(store, executor, config.scheduler.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Received Ctrl-C, shutting down...");

    shutdown_tx.send(true).ok();
    task.await.context("scheduler task panicked")?;

    tracing::info!("👋 candlekeeper stopped");
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_indicators(json: Option<&str>) -> anyhow::Result<Option<IndicatorConfig>> {
    json.map(|s| serde_json::from_str(s).context("invalid indicator configuration JSON"))
        .transpose()
}

async fn connector_command(service: &IngestService, action: ConnectorCommand) -> anyhow::Result<()> {
    match action {
        ConnectorCommand::Add {
            exchange,
            capacity,
            period_ms,
            sandbox,
            indicators,
        } => {
            let indicators = parse_indicators(indicators.as_deref())?.unwrap_or_default();
            let connector = service
                .register_connector(&exchange, RateLimitPolicy::new(capacity, period_ms), sandbox, indicators)
                .await?;
            print_json(&connector)?;
        }
        ConnectorCommand::Status { exchange, status } => {
            service.set_connector_status(&exchange, status).await?;
        }
        ConnectorCommand::Delete { exchange } => service.delete_connector(&exchange).await?,
        ConnectorCommand::List => print_json(&service.list_connectors().await?)?,
    }
    Ok(())
}

async fn job_command(service: &IngestService, action: JobCommand) -> anyhow::Result<()> {
    match action {
        JobCommand::Create {
            series,
            indicators,
            depends_on,
        } => {
            let mut new = NewJob::new(series.exchange, series.symbol, series.timeframe)
                .with_dependencies(depends_on);
            new.indicator_config = parse_indicators(indicators.as_deref())?;
            print_json(&service.create_job(new).await?)?;
        }
        JobCommand::Pause { id } => service.pause_job(id).await?,
        JobCommand::Resume { id } => service.resume_job(id).await?,
        JobCommand::Trigger { id } => {
            let result = service.trigger_run(id).await?;
            println!(
                "fetched {} stored {} outcome {:?}",
                result.candles_fetched, result.candles_stored, result.outcome
            );
        }
        JobCommand::Delete { id } => service.delete_job(id).await?,
        JobCommand::List => print_json(&service.list_jobs().await?)?,
    }
    Ok(())
}

async fn candles_command(service: &IngestService, action: CandlesCommand) -> anyhow::Result<()> {
    match action {
        CandlesCommand::Latest { series, limit } => {
            print_json(&service.latest_candles(&series.key(), limit).await?)?;
        }
        CandlesCommand::Range { series, from, to } => {
            print_json(&service.candle_range(&series.key(), from, to).await?)?;
        }
        CandlesCommand::Indicator {
            series,
            name,
            limit,
        } => {
            print_json(&service.indicator_series(&series.key(), &name, limit).await?)?;
        }
    }
    Ok(())
}
