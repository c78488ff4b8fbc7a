use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

use thiserror::Error;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("worker pool is closed")]
    Closed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Fixed-size pool of OS threads pulling jobs from one shared queue.
///
/// `close` only stops intake: queued jobs are still drained. Callers that need
/// to know when their jobs finished track completion themselves (see
/// [`super::fan_out`]), or `join` the pool.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Launch `workers` threads named `{name}-{index}`.
    pub fn start(name: impl Into<String>, workers: usize) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = Arc::clone(&receiver);
            let pool = name.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&pool, index, receiver))?;
            handles.push(handle);
        }

        debug!(pool = %name, workers, "worker pool started");

        Ok(Self {
            name,
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue one job. Safe while workers are draining.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        sender.send(Box::new(job)).map_err(|_| PoolError::Closed)
    }

    /// Stop accepting jobs. Workers exit once the queue is empty.
    pub fn close(&mut self) {
        self.sender.take();
    }

    /// Close and wait for every worker to exit.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(pool: &str, index: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // Lock is held only while waiting for the next job.
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();

        let Ok(job) = next else {
            break;
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(pool, worker = index, "job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            WorkerPool::start("empty", 0),
            Err(PoolError::NoWorkers)
        ));
    }

    #[test]
    fn join_drains_queued_jobs() {
        let pool = WorkerPool::start("drain", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn submit_after_close_fails() {
        let mut pool = WorkerPool::start("closed", 1).unwrap();
        pool.close();
        assert!(matches!(pool.submit(|| {}), Err(PoolError::Closed)));
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::start("panic", 1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(|| panic!("boom")).unwrap();
        let counter = Arc::clone(&done);
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn workers_are_named_after_pool() {
        let pool = WorkerPool::start("named", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        })
        .unwrap();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-0"));
        assert_eq!(pool.size(), 1);
    }
}
