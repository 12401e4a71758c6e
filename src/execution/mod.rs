// Job execution: scheduling, leased runs and fetched-data validation
pub mod executor;
pub mod scheduler;
pub mod validator;

pub use executor::{JobExecutor, RunOutcome, RunResult};
pub use scheduler::{Cadence, PassSummary, Scheduler};
pub use validator::CandleValidator;
