pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod sink;

pub use error::{RunnerError, StartError, SubmitError};
pub use pool::{PoolConfig, PoolStats};
pub use runner::Runner;
pub use scheduler::{JobRefresher, KeepAll, Refresh, RefreshReport, Scheduler};
pub use sink::{LogSink, MemorySink, ResultSink};
