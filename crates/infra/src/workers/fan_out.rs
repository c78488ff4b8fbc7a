use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};

use thiserror::Error;
use tracing::debug;

use super::pool::{PoolError, WorkerPool};

/// Why a fanned-out task produced no value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Result of one task, tagged with the task it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome<T, R, E> {
    pub task: T,
    pub result: Result<R, TaskError<E>>,
}

impl<T, R, E> TaskOutcome<T, R, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `work` over every task on a pool of `min(max_workers, tasks.len())`
/// threads and collect one outcome per task.
///
/// Outcomes come back in completion order; use [`TaskOutcome::task`] for
/// identity. A failing or panicking task never affects its siblings. An empty
/// task list returns immediately without starting threads.
pub fn fan_out<T, R, E, F>(
    name: &str,
    max_workers: usize,
    tasks: Vec<T>,
    work: F,
) -> Result<Vec<TaskOutcome<T, R, E>>, PoolError>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let total = tasks.len();
    let mut pool = WorkerPool::start(name, max_workers.min(total))?;
    let work = Arc::new(work);
    let (results_tx, results_rx) = mpsc::channel::<TaskOutcome<T, R, E>>();

    for task in tasks {
        // Every job holds a sender; the channel closes once the last job is done.
        let results_tx = results_tx.clone();
        let work = Arc::clone(&work);
        pool.submit(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| work(&task))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(TaskError::Failed(err)),
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };
            let _ = results_tx.send(TaskOutcome { task, result });
        })?;
    }
    drop(results_tx);
    pool.close();

    let outcomes: Vec<_> = results_rx.iter().collect();
    pool.join();

    debug!(pool = name, tasks = total, results = outcomes.len(), "fan-out complete");
    Ok(outcomes)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
