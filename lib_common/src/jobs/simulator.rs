//! # Simulation Manager
//!
//! Drives synthetic score updates against the service directly, bypassing
//! the HTTP edge. The working set is loaded once from the durable store and
//! walked round-robin over a shuffled order, reshuffling on every wrap, so
//! load spreads evenly while ratings still compound realistically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connections::{DurableStore, RankingIndex};
use crate::core::service::{LeaderboardService, ServiceError};
use crate::models::{MAX_RATING, MIN_RATING};

/// Interval between metric summaries.
const REPORT_INTERVAL: Duration = Duration::from_secs(30);
/// Errors are logged once per this many occurrences.
const ERROR_LOG_SAMPLE: u64 = 100;

/// Simulation tuning.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub tick_interval: Duration,
    pub updates_per_tick: usize,
    pub min_score_change: i32,
    pub max_score_change: i32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            updates_per_tick: 1,
            min_score_change: -50,
            max_score_change: 50,
        }
    }
}

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("simulation already running")]
    AlreadyRunning,
    #[error("simulation was stopped and cannot be restarted")]
    Stopped,
    #[error("no users available for simulation")]
    NoUsers,
    #[error("failed to load users: {0}")]
    Load(#[from] ServiceError),
}

#[derive(Default)]
struct SimMetrics {
    total_updates: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
}

/// Internal ticker generating update load against the service.
pub struct SimulationManager<I, S> {
    service: Arc<LeaderboardService<I, S>>,
    config: SimulatorConfig,
    running: AtomicBool,
    stop: CancellationToken,
    metrics: Arc<SimMetrics>,
    started_at: Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<I, S> SimulationManager<I, S>
where
    I: RankingIndex + 'static,
    S: DurableStore + 'static,
{
    pub fn new(service: Arc<LeaderboardService<I, S>>, config: SimulatorConfig) -> Self {
        Self {
            service,
            config,
            running: AtomicBool::new(false),
            stop: CancellationToken::new(),
            metrics: Arc::new(SimMetrics::default()),
            started_at: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Loads the working set and spawns the update loop plus the metrics
    /// reporter. Refuses to start twice, after a stop, or with no users.
    pub async fn start(&self) -> Result<(), SimulatorError> {
        if self.stop.is_cancelled() {
            return Err(SimulatorError::Stopped);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SimulatorError::AlreadyRunning);
        }

        let users = match self.service.get_all_users().await {
            Ok(users) => users,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        if users.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(SimulatorError::NoUsers);
        }

        let mut working_set: Vec<(String, i32)> = users
            .into_iter()
            .map(|user| (user.username, user.rating))
            .collect();

        *self.started_at.lock().expect("simulator lock poisoned") = Some(Instant::now());

        let max_rate = self.config.updates_per_tick as f64 * 1000.0
            / self.config.tick_interval.as_millis().max(1) as f64;
        info!(
            users = working_set.len(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            updates_per_tick = self.config.updates_per_tick,
            delta_min = self.config.min_score_change,
            delta_max = self.config.max_score_change,
            max_rate_per_sec = max_rate,
            "simulation manager started"
        );

        let loop_task = {
            let service = Arc::clone(&self.service);
            let config = self.config.clone();
            let metrics = Arc::clone(&self.metrics);
            let stop = self.stop.clone();
            tokio::spawn(async move {
                let mut rng = StdRng::from_entropy();
                let mut ticker = tokio::time::interval(config.tick_interval);
                let mut cursor = 0usize;
                working_set.shuffle(&mut rng);

                loop {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = ticker.tick() => {
                            for _ in 0..config.updates_per_tick {
                                if cursor >= working_set.len() {
                                    cursor = 0;
                                    working_set.shuffle(&mut rng);
                                }

                                let delta = rng
                                    .gen_range(config.min_score_change..=config.max_score_change);
                                let (username, rating) = working_set[cursor].clone();
                                let next = (rating + delta).clamp(MIN_RATING, MAX_RATING);

                                metrics.total_updates.fetch_add(1, Ordering::Relaxed);
                                match service.update_score(&username, next).await {
                                    Ok(()) => {
                                        metrics.success.fetch_add(1, Ordering::Relaxed);
                                        // Refresh the cached rating before the
                                        // cursor moves so deltas compound even
                                        // with several updates per tick.
                                        working_set[cursor].1 = next;
                                    }
                                    Err(err) => {
                                        let n =
                                            metrics.errors.fetch_add(1, Ordering::Relaxed) + 1;
                                        if n % ERROR_LOG_SAMPLE == 1 {
                                            warn!(total_errors = n, %err, "simulation update failed");
                                        }
                                    }
                                }
                                cursor += 1;
                            }
                        }
                    }
                }
            })
        };

        let reporter_task = {
            let metrics = Arc::clone(&self.metrics);
            let stop = self.stop.clone();
            let started = Instant::now();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(REPORT_INTERVAL);
                ticker.tick().await; // the first tick is immediate
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = ticker.tick() => {
                            let total = metrics.total_updates.load(Ordering::Relaxed);
                            let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                            info!(
                                updates = total,
                                success = metrics.success.load(Ordering::Relaxed),
                                errors = metrics.errors.load(Ordering::Relaxed),
                                rate_per_sec = total as f64 / elapsed,
                                "simulation metrics"
                            );
                        }
                    }
                }
            })
        };

        let mut tasks = self.tasks.lock().expect("simulator lock poisoned");
        tasks.push(loop_task);
        tasks.push(reporter_task);
        Ok(())
    }

    /// Stops the loop and the reporter and logs a final summary. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("simulator lock poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        let elapsed = self
            .started_at
            .lock()
            .expect("simulator lock poisoned")
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let total = self.metrics.total_updates.load(Ordering::Relaxed);
        info!(
            updates = total,
            success = self.metrics.success.load(Ordering::Relaxed),
            errors = self.metrics.errors.load(Ordering::Relaxed),
            duration_secs = elapsed.as_secs(),
            rate_per_sec = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            "simulation manager stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Counters so far: (total, success, errors).
    pub fn metrics(&self) -> (u64, u64, u64) {
        (
            self.metrics.total_updates.load(Ordering::Relaxed),
            self.metrics.success.load(Ordering::Relaxed),
            self.metrics.errors.load(Ordering::Relaxed),
        )
    }
}
