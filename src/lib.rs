// Core modules
pub mod adapters;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use adapters::{AdapterRegistry, ExchangeAdapter};
pub use config::AppConfig;
pub use execution::{JobExecutor, RunOutcome, RunResult, Scheduler};
pub use indicators::{IndicatorConfig, IndicatorEngine, IndicatorKind, IndicatorParams};
pub use models::*;
pub use rate_limit::RateLimiter;
pub use service::IngestService;
pub use store::{MemoryStore, PostgresStore, Store};
