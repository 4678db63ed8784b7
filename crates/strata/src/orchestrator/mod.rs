//! # Orchestrator
//!
//! Owns the two background loops and the job state machine.
//!
//! ```text
//!                 ┌──────────────────────── consumer thread ───────────────────────┐
//!   producers ──> │ default queue ──get(poll)──> PatchApplier::apply ──> counters   │
//!                 └────────────────────────────────────────────────────────────────┘
//!
//!                 ┌────────────────────────── tick thread ─────────────────────────┐
//!                 │ 1. advance WorldDrivers                                         │
//!                 │ 2. run up to `job_batch_size` pending jobs (priority, age)      │
//!                 │ 3. publish orchestrator metrics                                 │
//!                 │ 4. wait out the rest of the period on the shutdown channel      │
//!                 └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! The job board lock and the world lock are never held together: a job is
//! moved to `Running` and copied out, its handler runs with no board lock,
//! then the board is locked again to record the outcome.
//!
//! ## Failure isolation
//!
//! Handler errors and panics fail the job. Panics while applying a patch are
//! logged and counted; the consumer keeps going.

pub mod handlers;
pub mod job;

pub use handlers::{JobContext, JobHandler, JobHandlers, WorldDriver, DEFAULT_SYNC_FIELD};
pub use job::{Job, JobBoard, JobKind, JobStatus, RetentionPolicy};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use strata_core::{FieldMap, WorldStats, WorldStore};
use strata_patch::{PatchApplier, PatchQueue, PatchResult, QueueManager, QueueStats, Wait};
use strata_shared::{
    MetricTags, MetricsSink, DEFAULT_CONSUMER_POLL, DEFAULT_JOB_BATCH_SIZE, DEFAULT_JOIN_TIMEOUT,
    DEFAULT_QUEUE_NAME, DEFAULT_TICK_PERIOD,
};

use crate::error::{JobError, OrchestratorError, OrchestratorResult};

/// Loop timing and job scheduling knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Target period of the tick loop.
    pub tick_period: Duration,
    /// How long the consumer blocks on an empty queue before re-checking
    /// for shutdown.
    pub consumer_poll: Duration,
    /// Maximum jobs run per tick.
    pub job_batch_size: usize,
    /// How long `stop` waits for each loop.
    pub join_timeout: Duration,
    /// Retention applied by `maintenance` jobs.
    pub retention: RetentionPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            consumer_poll: DEFAULT_CONSUMER_POLL,
            job_batch_size: DEFAULT_JOB_BATCH_SIZE,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Everything an orchestrator is built from.
pub struct OrchestratorParts {
    /// The world.
    pub world: Arc<WorldStore>,
    /// Patch queues; the consumer drains the `default` one.
    pub queues: Arc<QueueManager>,
    /// Applier bound to `world`.
    pub applier: PatchApplier,
    /// Metrics destination.
    pub metrics: Arc<dyn MetricsSink>,
    /// Handlers for custom jobs.
    pub handlers: JobHandlers,
    /// Per-tick world drivers, run in order.
    pub drivers: Vec<Arc<dyn WorldDriver>>,
    /// Timing and scheduling.
    pub settings: OrchestratorSettings,
}

/// Point-in-time orchestrator counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrchestratorStats {
    /// True while the loops run.
    pub running: bool,
    /// Seconds since `start`, 0 when stopped.
    pub uptime_seconds: f64,
    /// Ticks run so far.
    pub ticks: u64,
    /// Patches taken off the default queue, including ones whose
    /// application panicked.
    pub patches_processed: u64,
    /// Applied patches with at least one failed operation, plus patches whose
    /// application panicked.
    pub patches_failed: u64,
    /// Most recent patch failure.
    pub last_patch_error: Option<String>,
    /// Jobs that completed.
    pub jobs_completed: u64,
    /// Jobs that failed.
    pub jobs_failed: u64,
    /// Jobs waiting to run.
    pub jobs_pending: usize,
    /// Jobs currently running.
    pub jobs_running: usize,
    /// Per-queue counters.
    pub queues: BTreeMap<String, QueueStats>,
    /// World counters.
    pub world: WorldStats,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    patches_processed: AtomicU64,
    patches_failed: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    last_patch_error: Mutex<Option<String>>,
}

/// State shared between the handle and the loop threads.
struct Core {
    world: Arc<WorldStore>,
    queues: Arc<QueueManager>,
    applier: PatchApplier,
    jobs: JobBoard,
    handlers: JobHandlers,
    drivers: Vec<Arc<dyn WorldDriver>>,
    metrics: Arc<dyn MetricsSink>,
    settings: OrchestratorSettings,
    counters: Counters,
    started_at: Mutex<Option<Instant>>,
}

impl Core {
    fn consumer_loop(&self, shutdown: &Receiver<()>) {
        tracing::info!(poll = ?self.settings.consumer_poll, "Patch consumer started");
        let queue = self.queues.default_queue();

        while !shutdown_requested(shutdown) {
            let _ = self.consume_one(&queue, Wait::Timeout(self.settings.consumer_poll));
        }

        tracing::info!("Patch consumer stopped");
    }

    /// Takes one patch off `queue` and applies it. `None` when the queue
    /// stayed empty or the application panicked; a dequeued patch always
    /// counts as processed.
    fn consume_one(&self, queue: &PatchQueue, wait: Wait) -> Option<PatchResult> {
        let patch = queue.get(wait)?;
        let patch_id = patch.id().to_string();
        let applied = panic::catch_unwind(AssertUnwindSafe(|| self.applier.apply(patch)));

        self.counters.patches_processed.fetch_add(1, Ordering::Relaxed);
        let result = match applied {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(patch = %patch_id, panic = %message, "Patch application panicked");
                self.counters.patches_failed.fetch_add(1, Ordering::Relaxed);
                *self.counters.last_patch_error.lock() = Some(format!("panic: {message}"));
                return None;
            }
        };
        if !result.success {
            self.counters.patches_failed.fetch_add(1, Ordering::Relaxed);
            if let Some(first) = result.errors.first() {
                *self.counters.last_patch_error.lock() = Some(first.clone());
            }
        }
        Some(result)
    }

    fn tick_loop(&self, shutdown: &Receiver<()>) {
        tracing::info!(period = ?self.settings.tick_period, "Tick loop started");
        let mut last_tick = Instant::now();

        loop {
            let tick_start = Instant::now();
            let delta = tick_start.duration_since(last_tick);
            last_tick = tick_start;

            let executed = self.tick(delta);

            let elapsed = tick_start.elapsed();
            if elapsed > self.settings.tick_period {
                tracing::warn!(
                    ?elapsed,
                    period = ?self.settings.tick_period,
                    jobs = executed,
                    "Tick overran its period"
                );
            }
            match shutdown.recv_timeout(self.settings.tick_period.saturating_sub(elapsed)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::info!("Tick loop stopped");
    }

    /// One tick. Returns how many jobs ran.
    fn tick(&self, delta: Duration) -> usize {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        for driver in &self.drivers {
            match panic::catch_unwind(AssertUnwindSafe(|| driver.advance(&self.world, delta))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(driver = driver.name(), error = %e, "World driver failed"),
                Err(payload) => tracing::error!(
                    driver = driver.name(),
                    panic = %panic_message(payload.as_ref()),
                    "World driver panicked"
                ),
            }
        }

        let mut executed = 0;
        for id in self.jobs.next_pending(self.settings.job_batch_size) {
            match self.execute_job(&id) {
                Ok(_) => executed += 1,
                // Taken by a direct `execute_job` call in the meantime.
                Err(e) => tracing::debug!(job = %id, error = %e, "Skipped job"),
            }
        }

        self.publish_metrics();
        executed
    }

    fn execute_job(&self, id: &str) -> OrchestratorResult<JobStatus> {
        let job = self.jobs.begin(id)?;
        tracing::debug!(job = %job.id, job_type = %job.job_type, "Job started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&job)))
            .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))));
        if let Err(e) = &outcome {
            tracing::warn!(job = %job.id, job_type = %job.job_type, error = %e, "Job failed");
        }

        let finished = self.jobs.finish(id, outcome)?;
        let counter = match finished.status {
            JobStatus::Completed => &self.counters.jobs_completed,
            _ => &self.counters.jobs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut tags = MetricTags::new();
        tags.insert("job_type".to_string(), finished.job_type.to_string());
        tags.insert("status".to_string(), finished.status.to_string());
        self.metrics.record_metric("orchestrator.job_finished", 1.0, Some(&tags));
        if let Some(duration) = finished.duration() {
            #[allow(clippy::cast_precision_loss)]
            self.metrics
                .record_metric("orchestrator.job_duration_ms", duration.as_millis() as f64, Some(&tags));
        }

        tracing::debug!(job = %finished.id, status = %finished.status, "Job finished");
        Ok(finished.status)
    }

    fn dispatch(&self, job: &Job) -> Result<Value, JobError> {
        let ctx = JobContext {
            job,
            world: &self.world,
            applier: &self.applier,
            jobs: &self.jobs,
            metrics: self.metrics.as_ref(),
            retention: &self.settings.retention,
        };
        match &job.job_type {
            JobKind::ActivateRegion => handlers::activate_region(&ctx),
            JobKind::SpawnEntity => handlers::spawn_entity(&ctx),
            JobKind::Maintenance => handlers::maintenance(&ctx),
            JobKind::SyncMetric => handlers::sync_metric(&ctx),
            JobKind::Custom(name) => match self.handlers.get(name) {
                Some(handler) => handler.run(&ctx),
                None => Err(JobError::UnknownJobType(name.clone())),
            },
        }
    }

    fn uptime(&self) -> Duration {
        self.started_at.lock().map_or(Duration::ZERO, |at| at.elapsed())
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_metrics(&self) {
        let metrics = self.metrics.as_ref();
        metrics.record_metric("orchestrator.uptime_seconds", self.uptime().as_secs_f64(), None);
        metrics.record_metric(
            "orchestrator.patches_processed",
            self.counters.patches_processed.load(Ordering::Relaxed) as f64,
            None,
        );
        metrics.record_metric(
            "orchestrator.jobs_completed",
            self.counters.jobs_completed.load(Ordering::Relaxed) as f64,
            None,
        );
        metrics.record_metric(
            "orchestrator.jobs_pending",
            self.jobs.count(JobStatus::Pending) as f64,
            None,
        );
        let default_size = self.queues.get(DEFAULT_QUEUE_NAME).map_or(0, |q| q.qsize());
        metrics.record_metric("queue.default.size", default_size as f64, None);
    }
}

struct LoopHandle {
    name: &'static str,
    handle: JoinHandle<()>,
    /// Disconnects when the loop thread exits, however it exits.
    done: Receiver<()>,
}

impl LoopHandle {
    fn spawn(
        name: &'static str,
        core: Arc<Core>,
        shutdown: Receiver<()>,
        body: fn(&Core, &Receiver<()>),
    ) -> OrchestratorResult<Self> {
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                body(&core, &shutdown);
            })
            .map_err(|e| OrchestratorError::Spawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { name, handle, done })
    }

    fn join(self, timeout: Duration) {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    tracing::warn!(thread = self.name, "Loop thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    thread = self.name,
                    ?timeout,
                    "Loop did not stop in time, detaching"
                );
            }
        }
    }
}

struct RunningLoops {
    /// Dropping the sender is the shutdown signal.
    shutdown: Sender<()>,
    loops: Vec<LoopHandle>,
}

/// The patch consumer, the tick loop and the job scheduler.
pub struct Orchestrator {
    core: Arc<Core>,
    running: Mutex<Option<RunningLoops>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.is_running())
            .field("settings", &self.core.settings)
            .field("jobs", &self.core.jobs)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates a stopped orchestrator.
    #[must_use]
    pub fn new(parts: OrchestratorParts) -> Self {
        let OrchestratorParts {
            world,
            queues,
            applier,
            metrics,
            handlers,
            drivers,
            settings,
        } = parts;
        Self {
            core: Arc::new(Core {
                world,
                queues,
                applier,
                jobs: JobBoard::new(),
                handlers,
                drivers,
                metrics,
                settings,
                counters: Counters::default(),
                started_at: Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    /// Starts both loops. Does nothing if they already run.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Spawn`] if a thread cannot be created; nothing is
    /// left running in that case.
    pub fn start(&self) -> OrchestratorResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        *self.core.started_at.lock() = Some(Instant::now());

        let consumer = LoopHandle::spawn(
            "strata-consumer",
            Arc::clone(&self.core),
            shutdown_rx.clone(),
            Core::consumer_loop,
        )
        .map_err(|e| {
            *self.core.started_at.lock() = None;
            e
        })?;
        let ticker = match LoopHandle::spawn("strata-tick", Arc::clone(&self.core), shutdown_rx, Core::tick_loop) {
            Ok(ticker) => ticker,
            Err(e) => {
                drop(shutdown_tx);
                consumer.join(self.core.settings.join_timeout);
                *self.core.started_at.lock() = None;
                return Err(e);
            }
        };

        *running = Some(RunningLoops {
            shutdown: shutdown_tx,
            loops: vec![consumer, ticker],
        });
        tracing::info!(
            tick_period = ?self.core.settings.tick_period,
            job_batch_size = self.core.settings.job_batch_size,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Signals both loops to stop and waits up to the join timeout for each.
    /// Does nothing if they are not running.
    pub fn stop(&self) {
        let Some(RunningLoops { shutdown, loops }) = self.running.lock().take() else {
            return;
        };
        drop(shutdown);
        for handle in loops {
            handle.join(self.core.settings.join_timeout);
        }
        *self.core.started_at.lock() = None;
        tracing::info!("Orchestrator stopped");
    }

    /// True while the loops run.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Submits a pending job and returns its id.
    pub fn submit_job(&self, job_type: JobKind, priority: i32, metadata: FieldMap) -> String {
        let id = self.core.jobs.submit(job_type, priority, metadata);
        tracing::debug!(job = %id, priority, "Job submitted");
        id
    }

    /// Runs a pending job now, on the calling thread.
    ///
    /// Handler failures are not errors here: they are recorded on the job
    /// and reflected in the returned status.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::JobNotFound`] for an unknown id,
    /// [`OrchestratorError::InvalidTransition`] if the job is not pending.
    pub fn execute_job(&self, id: &str) -> OrchestratorResult<JobStatus> {
        self.core.execute_job(id)
    }

    /// Runs one tick on the calling thread and returns how many jobs ran.
    pub fn tick_once(&self) -> usize {
        self.core.tick(Duration::ZERO)
    }

    /// Applies the next patch from the default queue on the calling thread.
    /// Returns `None` if no patch arrived in time or applying it panicked.
    pub fn process_next_patch(&self, wait: Wait) -> Option<PatchResult> {
        self.core.consume_one(&self.core.queues.default_queue(), wait)
    }

    /// Returns a copy of the job.
    #[must_use]
    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.core.jobs.get(id)
    }

    /// Jobs in submission order, optionally filtered by status.
    #[must_use]
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.core.jobs.list(status)
    }

    /// The job board.
    #[must_use]
    pub fn jobs(&self) -> &JobBoard {
        &self.core.jobs
    }

    /// The applier used by the consumer and by jobs.
    #[must_use]
    pub fn applier(&self) -> &PatchApplier {
        &self.core.applier
    }

    /// Loop timing and scheduling knobs.
    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.core.settings
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        let core = &self.core;
        OrchestratorStats {
            running: self.is_running(),
            uptime_seconds: core.uptime().as_secs_f64(),
            ticks: core.counters.ticks.load(Ordering::Relaxed),
            patches_processed: core.counters.patches_processed.load(Ordering::Relaxed),
            patches_failed: core.counters.patches_failed.load(Ordering::Relaxed),
            last_patch_error: core.counters.last_patch_error.lock().clone(),
            jobs_completed: core.counters.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: core.counters.jobs_failed.load(Ordering::Relaxed),
            jobs_pending: core.jobs.count(JobStatus::Pending),
            jobs_running: core.jobs.count(JobStatus::Running),
            queues: core.queues.statistics(),
            world: core.world.statistics(),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
