pub mod pool;
pub mod progress;
pub mod runner;

pub use pool::{PoolHandle, PoolSettings, WorkerPool};
pub use progress::{BusProgress, NoopProgress, ProgressReporter};
pub use runner::{JobRunner, RunOutcome, RunnerSettings};
