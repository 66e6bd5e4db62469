//! # Durable-Write Worker Pool
//!
//! Fixed-width executor that drains score updates into the durable store off
//! the request path. Submission never blocks: a full queue is a counted
//! backpressure event and the update is dropped (the ranking index has
//! already accepted it, so the client still sees success). Panics and
//! per-task timeouts are absorbed per task; the workers keep running.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connections::DurableStore;

/// One pending durable write.
#[derive(Debug, Clone)]
pub struct ScoreUpdateTask {
    pub username: String,
    pub rating: i32,
}

/// Pool sizing and deadlines.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Deadline for a single store upsert.
    pub task_timeout: Duration,
    /// Deadline for draining the queue on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 20,
            queue_capacity: 1000,
            task_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a submission was refused.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("worker pool queue full (backpressure)")]
    Backpressure,
    #[error("worker pool is shut down")]
    Closed,
}

/// Shutdown outcome.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("worker pool shutdown timed out; outstanding tasks abandoned")]
    Timeout,
}

#[derive(Default)]
struct PoolMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
    backpressure: AtomicU64,
    total_processing_nanos: AtomicU64,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub backpressure: u64,
    pub avg_processing: Duration,
    pub queue_used: usize,
    pub queue_capacity: usize,
}

/// Bounded async executor dedicated to background durable writes.
pub struct WorkerPool {
    jobs: Mutex<Option<mpsc::Sender<ScoreUpdateTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    metrics: Arc<PoolMetrics>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Spawns the workers and returns the running pool.
    pub fn start<S: DurableStore + 'static>(store: Arc<S>, config: WorkerPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<ScoreUpdateTask>(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let cancel = CancellationToken::new();
        let metrics = Arc::new(PoolMetrics::default());

        info!(
            workers = config.worker_count,
            queue = config.queue_capacity,
            "starting worker pool"
        );

        let mut workers = Vec::with_capacity(config.worker_count);
        for id in 1..=config.worker_count {
            workers.push(tokio::spawn(worker_loop(
                id,
                Arc::clone(&store),
                Arc::clone(&rx),
                cancel.clone(),
                Arc::clone(&metrics),
                config.task_timeout,
            )));
        }

        Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            cancel,
            metrics,
            config,
        }
    }

    /// Non-blocking submission. A full queue yields
    /// [`SubmitError::Backpressure`] and bumps the counter; the caller is
    /// expected to proceed without the durable write.
    pub fn submit(&self, task: ScoreUpdateTask) -> Result<(), SubmitError> {
        let guard = self.jobs.lock().expect("worker pool lock poisoned");
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::Closed);
        };
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.metrics.backpressure.fetch_add(1, Ordering::Relaxed);
                warn!(
                    username = %task.username,
                    "worker queue full, dropping durable write"
                );
                Err(SubmitError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }

    /// Closes the queue and waits for the workers to drain it. If draining
    /// exceeds the configured deadline, the cancel signal is raised and
    /// outstanding tasks are abandoned.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        info!("shutting down worker pool");
        // Dropping the sender closes the queue; recv drains what is left.
        self.jobs.lock().expect("worker pool lock poisoned").take();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("worker pool lock poisoned");
            workers.drain(..).collect()
        };

        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, join_all).await {
            Ok(()) => {
                let snapshot = self.snapshot();
                info!(
                    processed = snapshot.processed,
                    failed = snapshot.failed,
                    backpressure = snapshot.backpressure,
                    "worker pool drained"
                );
                Ok(())
            }
            Err(_) => {
                self.cancel.cancel();
                warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "worker pool shutdown timed out, cancelling in-flight tasks"
                );
                Err(ShutdownError::Timeout)
            }
        }
    }

    /// Snapshot of the counters plus current queue utilisation.
    pub fn snapshot(&self) -> PoolSnapshot {
        let processed = self.metrics.processed.load(Ordering::Relaxed);
        let total_nanos = self.metrics.total_processing_nanos.load(Ordering::Relaxed);
        let avg_processing = if processed > 0 {
            Duration::from_nanos(total_nanos / processed)
        } else {
            Duration::ZERO
        };
        let queue_used = self
            .jobs
            .lock()
            .expect("worker pool lock poisoned")
            .as_ref()
            .map(|tx| self.config.queue_capacity - tx.capacity())
            .unwrap_or(0);

        PoolSnapshot {
            processed,
            failed: self.metrics.failed.load(Ordering::Relaxed),
            backpressure: self.metrics.backpressure.load(Ordering::Relaxed),
            avg_processing,
            queue_used,
            queue_capacity: self.config.queue_capacity,
        }
    }
}

async fn worker_loop<S: DurableStore>(
    id: usize,
    store: Arc<S>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ScoreUpdateTask>>>,
    cancel: CancellationToken,
    metrics: Arc<PoolMetrics>,
    task_timeout: Duration,
) {
    debug!(worker = id, "worker started");
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(worker = id, "worker cancelled");
                return;
            }
            task = async { rx.lock().await.recv().await } => match task {
                Some(task) => task,
                None => {
                    debug!(worker = id, "queue closed, worker exiting");
                    return;
                }
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = id, "in-flight task cancelled");
                return;
            }
            _ = process_task(id, &store, &task, &metrics, task_timeout) => {}
        }
    }
}

async fn process_task<S: DurableStore>(
    worker: usize,
    store: &Arc<S>,
    task: &ScoreUpdateTask,
    metrics: &PoolMetrics,
    task_timeout: Duration,
) {
    let started = Instant::now();
    let upsert = tokio::time::timeout(task_timeout, store.upsert(&task.username, task.rating));

    // A panicking store must not take the worker down with it.
    let outcome = AssertUnwindSafe(upsert).catch_unwind().await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(Ok(()))) => {
            metrics.processed.fetch_add(1, Ordering::Relaxed);
            metrics
                .total_processing_nanos
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
        Ok(Ok(Err(err))) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            error!(worker, username = %task.username, %err, "durable upsert failed");
        }
        Ok(Err(_elapsed)) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                worker,
                username = %task.username,
                timeout_ms = task_timeout.as_millis() as u64,
                "durable upsert timed out"
            );
        }
        Err(panic) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(worker, username = %task.username, panic = %detail, "worker task panicked");
        }
    }
}
