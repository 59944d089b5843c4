//! Bounded worker pool for check calls.
//!
//! Behaves like a classic bounded thread pool, built from tokio tasks:
//!
//! - `core_size` workers live for the life of the pool
//! - Jobs queue in a bounded channel of `queue_size`
//! - With the queue full and fewer than `max_size` workers, a temporary
//!   worker is started with the job as its first task; it exits after
//!   `keep_alive` without work
//! - Otherwise the job is rejected with [`PoolError::Saturated`]
//!
//! Each job runs in its own task, so a panicking job is reported to its
//! caller and the worker carries on.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{validate_thread_pool, ThreadPoolConfig};
use crate::observability::metrics;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Worker pool failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// Queue full and every allowed worker busy.
    #[error("Worker pool saturated")]
    Saturated,

    #[error("Worker pool is shut down")]
    Closed,

    /// The job panicked or was dropped before completing.
    #[error("Job did not complete")]
    JobFailed,
}

struct Shared {
    receiver: Mutex<mpsc::Receiver<Job>>,
    workers: AtomicUsize,
    max_size: usize,
    keep_alive: Duration,
    cancel_token: CancellationToken,
}

/// Bounded pool executing async jobs.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start the pool with `core_size` workers.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the sizing is invalid (zero core or queue, max
    /// below core).
    pub fn new(config: &ThreadPoolConfig, cancel_token: CancellationToken) -> Result<Self, PoolError> {
        validate_thread_pool(config).map_err(|e| PoolError::InvalidConfig(e.to_string()))?;

        let (sender, receiver) = mpsc::channel(config.queue_size);
        let shared = Arc::new(Shared {
            receiver: Mutex::new(receiver),
            workers: AtomicUsize::new(config.core_size),
            max_size: config.max_size,
            keep_alive: config.keep_alive_time,
            cancel_token,
        });

        for _ in 0..config.core_size {
            tokio::spawn(run_worker(Arc::clone(&shared), None, true));
        }
        metrics::set_worker_count(config.core_size);

        tracing::info!(
            target: "enforcer.server",
            core_size = config.core_size,
            max_size = config.max_size,
            queue_size = config.queue_size,
            keep_alive_seconds = config.keep_alive_time.as_secs(),
            "Worker pool started"
        );

        Ok(Self { sender, shared })
    }

    /// Submit a job without waiting for it.
    ///
    /// # Errors
    ///
    /// `Saturated` when the job cannot be queued or given a new worker;
    /// `Closed` after shutdown.
    pub fn try_execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shared.cancel_token.is_cancelled() {
            return Err(PoolError::Closed);
        }

        match self.sender.try_send(Box::pin(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                if self.reserve_worker() {
                    tokio::spawn(run_worker(Arc::clone(&self.shared), Some(job), false));
                    Ok(())
                } else {
                    metrics::record_pool_rejection();
                    tracing::warn!(target: "enforcer.server", "Worker pool saturated, rejecting job");
                    Err(PoolError::Saturated)
                }
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::Closed),
        }
    }

    /// Run `job` on the pool and wait for its output.
    ///
    /// # Errors
    ///
    /// As [`WorkerPool::try_execute`], plus `JobFailed` if the job panicked.
    pub async fn execute<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.try_execute(async move {
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(job.await);
        })?;
        rx.await.map_err(|_| PoolError::JobFailed)
    }

    /// Workers currently alive.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Stop all workers. Queued jobs are dropped.
    pub fn shutdown(&self) {
        self.shared.cancel_token.cancel();
    }

    fn reserve_worker(&self) -> bool {
        let workers = &self.shared.workers;
        let mut current = workers.load(Ordering::SeqCst);
        while current < self.shared.max_size {
            match workers.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    metrics::set_worker_count(current + 1);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
        false
    }
}

async fn run_worker(shared: Arc<Shared>, first_job: Option<Job>, core: bool) {
    if let Some(job) = first_job {
        run_job(job).await;
    }

    loop {
        let next = tokio::select! {
            () = shared.cancel_token.cancelled() => None,
            job = async { shared.receiver.lock().await.recv().await } => job,
            () = tokio::time::sleep(shared.keep_alive), if !core => None,
        };
        match next {
            Some(job) => run_job(job).await,
            None => break,
        }
    }

    let remaining = shared.workers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    metrics::set_worker_count(remaining);
    tracing::debug!(target: "enforcer.server", core, remaining, "Worker exited");
}

async fn run_job(job: Job) {
    if let Err(e) = tokio::spawn(job).await {
        if e.is_panic() {
            tracing::error!(target: "enforcer.server", "Worker job panicked");
        }
    }
}
