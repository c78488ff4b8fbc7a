//! Bounded worker pool and fan-out/fan-in over it.
//!
//! - `WorkerPool`: fixed set of named OS threads draining a shared queue
//! - `fan_out`: one job per task, results collected in completion order

pub mod fan_out;
pub mod pool;

pub use fan_out::{TaskError, TaskOutcome, fan_out};
pub use pool::{PoolError, WorkerPool};
