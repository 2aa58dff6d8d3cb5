//! Polling worker
//!
//! Repeatedly dequeues records from a [`Store`], hands each to a [`Handler`]
//! on its own task (bounded by `num_handlers`), and reports the outcome back to
//! the store. An optional heartbeat loop renews leases on in-flight records.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use super::heartbeat::HeartbeatLoop;
use super::options::WorkerOptions;
use super::running::RunningSet;
use crate::clock::{Clock, SystemClock};
use crate::handler::{HandleOutcome, Handler, HandlerContext, PreDequeue};
use crate::metrics::WorkerMetrics;
use crate::store::{Record, RecordId, Store};

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Created, not yet running
    Idle,
    /// Dequeuing and handling records
    Running,
    /// No longer dequeuing; waiting for in-flight handlers
    Draining,
    /// Fully stopped
    Stopped,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Options failed validation
    #[error("invalid worker options: {0}")]
    InvalidOptions(String),

    /// `run` was called more than once
    #[error("worker has already been started")]
    AlreadyStarted,
}

/// Polling worker over a store of `R` records
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use workerutil::prelude::*;
///
/// #[derive(Clone)]
/// struct Job {
///     id: i64,
/// }
///
/// impl Record for Job {
///     fn record_id(&self) -> RecordId {
///         self.id
///     }
/// }
///
/// struct PrintHandler;
///
/// #[async_trait]
/// impl Handler<Job> for PrintHandler {
///     async fn handle(&self, _ctx: &HandlerContext, job: &Job) -> anyhow::Result<()> {
///         println!("handling {}", job.id);
///         Ok(())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let store = Arc::new(InMemoryStore::<Job>::new());
/// store.push(Job { id: 1 });
///
/// let options = WorkerOptions::new("printer")
///     .with_num_handlers(4)
///     .with_interval(Duration::from_millis(100));
/// let worker = Arc::new(Worker::new(store, Arc::new(PrintHandler), options)?);
///
/// let handle = worker.start();
/// tokio::signal::ctrl_c().await?;
/// worker.shutdown().await;
/// handle.await??;
/// # Ok(())
/// # }
/// ```
pub struct Worker<R: Record> {
    options: WorkerOptions,
    store: Arc<dyn Store<R>>,
    handler: Arc<dyn Handler<R>>,
    metrics: Arc<WorkerMetrics>,

    dequeue_clock: Arc<dyn Clock>,
    heartbeat_clock: Arc<dyn Clock>,
    shutdown_clock: Arc<dyn Clock>,

    running: Arc<RunningSet>,
    handler_slots: Arc<Semaphore>,
    handler_tasks: TaskTracker,

    shutdown: CancellationToken,
    status: watch::Sender<WorkerStatus>,
    started: AtomicBool,
    num_dequeues: AtomicU64,
}

impl<R: Record> Worker<R> {
    /// Create a worker; fails if the options are invalid
    pub fn new<S, H>(
        store: Arc<S>,
        handler: Arc<H>,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError>
    where
        S: Store<R>,
        H: Handler<R>,
    {
        Self::from_dyn(store, handler, options)
    }

    /// Create a worker from already type-erased collaborators
    pub fn from_dyn(
        store: Arc<dyn Store<R>>,
        handler: Arc<dyn Handler<R>>,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError> {
        options.validate()?;

        let (status, _) = watch::channel(WorkerStatus::Idle);

        Ok(Self {
            metrics: Arc::new(WorkerMetrics::new(options.name.clone())),
            handler_slots: Arc::new(Semaphore::new(options.num_handlers)),
            options,
            store,
            handler,
            dequeue_clock: Arc::new(SystemClock),
            heartbeat_clock: Arc::new(SystemClock),
            shutdown_clock: Arc::new(SystemClock),
            running: Arc::new(RunningSet::new()),
            handler_tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            status,
            started: AtomicBool::new(false),
            num_dequeues: AtomicU64::new(0),
        })
    }

    /// Replace the dequeue, heartbeat, and max-active-time clocks
    pub fn with_clocks(
        mut self,
        dequeue: impl Clock,
        heartbeat: impl Clock,
        shutdown: impl Clock,
    ) -> Self {
        self.dequeue_clock = Arc::new(dequeue);
        self.heartbeat_clock = Arc::new(heartbeat);
        self.shutdown_clock = Arc::new(shutdown);
        self
    }

    /// Share a metrics registry with the caller
    pub fn with_metrics(mut self, metrics: Arc<WorkerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Ids of records currently being handled, sorted ascending
    pub fn in_flight_ids(&self) -> Vec<RecordId> {
        self.running.ids()
    }

    /// Number of dequeue calls made so far
    pub fn num_dequeues(&self) -> u64 {
        self.num_dequeues.load(Ordering::SeqCst)
    }

    /// Fire the cancellation token of an in-flight record
    ///
    /// Returns false if the record is not in flight. The record is still
    /// reported to the store when its handler returns.
    pub fn cancel(&self, id: RecordId) -> bool {
        self.running.cancel(id)
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<(), WorkerError>> {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.run().await })
    }

    /// Ask the worker to stop dequeuing
    ///
    /// Idempotent and non-blocking. A worker that never started goes straight to
    /// [`WorkerStatus::Stopped`].
    pub fn stop(&self) {
        let was_idle = self.status.send_if_modified(|status| {
            if *status == WorkerStatus::Idle {
                *status = WorkerStatus::Stopped;
                true
            } else {
                false
            }
        });

        if !self.shutdown.is_cancelled() {
            info!(worker = %self.options.name, was_idle, "Stop requested");
        }
        self.shutdown.cancel();
    }

    /// Wait until the worker has fully stopped
    pub async fn wait(&self) {
        let mut status = self.status.subscribe();
        let _ = status.wait_for(|s| *s == WorkerStatus::Stopped).await;
    }

    /// Stop the worker and wait for in-flight handlers to finish
    pub async fn shutdown(&self) {
        self.stop();
        self.wait().await;
    }

    /// Run the dequeue loop until stopped or a budget is exhausted
    ///
    /// Returns once every in-flight handler has finished and its outcome has
    /// been reported to the store.
    #[instrument(skip(self), fields(worker = %self.options.name))]
    pub async fn run(&self) -> Result<(), WorkerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let began = self.status.send_if_modified(|status| {
            if *status == WorkerStatus::Idle {
                *status = WorkerStatus::Running;
                true
            } else {
                false
            }
        });
        if !began {
            debug!("Worker stopped before it started");
            return Ok(());
        }

        info!(
            worker_hostname = %self.options.worker_hostname,
            num_handlers = self.options.num_handlers,
            interval_ms = self.options.interval.as_millis() as u64,
            "Worker started"
        );

        let background = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat_loop(background.clone());
        let deadline = self.spawn_deadline_watcher(background.clone());

        let reason = self.dequeue_loop().await;
        self.shutdown.cancel();
        self.status.send_replace(WorkerStatus::Draining);
        info!(
            reason,
            in_flight = self.running.len(),
            "Worker draining"
        );

        self.handler_tasks.close();
        self.handler_tasks.wait().await;

        background.cancel();
        for task in [heartbeat, deadline].into_iter().flatten() {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }

        self.status.send_replace(WorkerStatus::Stopped);
        info!(dequeues = self.num_dequeues(), "Worker stopped");

        Ok(())
    }

    async fn dequeue_loop(&self) -> &'static str {
        loop {
            if self.shutdown.is_cancelled() {
                return "stop requested";
            }
            if self.budget_exhausted() {
                return "dequeue budget exhausted";
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return "stop requested",
                permit = Arc::clone(&self.handler_slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return "handler slots closed",
                },
            };

            let claimed = self.dequeue_and_handle(permit).await;
            if self.budget_exhausted() {
                return "dequeue budget exhausted";
            }
            if claimed {
                continue;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return "stop requested",
                _ = self.dequeue_clock.sleep(self.options.interval) => {}
            }
        }
    }

    fn budget_exhausted(&self) -> bool {
        self.options.num_total_jobs > 0 && self.num_dequeues() >= self.options.num_total_jobs
    }

    /// Claim one record and spawn its handler; returns true if a record was claimed
    async fn dequeue_and_handle(&self, permit: OwnedSemaphorePermit) -> bool {
        let extra = match self.handler.pre_dequeuer() {
            None => None,
            Some(gate) => match gate.pre_dequeue().await {
                Ok(PreDequeue::Dequeue { extra }) => extra,
                Ok(PreDequeue::Skip) => {
                    trace!("Pre-dequeue hook skipped this tick");
                    self.metrics.record_skipped_dequeue();
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Pre-dequeue hook failed");
                    self.metrics.record_skipped_dequeue();
                    return false;
                }
            },
        };

        self.num_dequeues.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let result = self
            .store
            .dequeue(&self.options.worker_hostname, extra)
            .await;
        self.metrics
            .dequeue
            .observe(started.elapsed(), result.is_ok());

        let record = match result {
            Ok(Some(record)) => record,
            Ok(None) => {
                trace!("No record available");
                self.metrics.record_empty_dequeue();
                return false;
            }
            Err(e) => {
                error!(error = %e, "Failed to dequeue record");
                return false;
            }
        };

        let record_id = record.record_id();
        let cancellation = CancellationToken::new();
        if !self.running.add(record_id, cancellation.clone()) {
            warn!(record_id, "Store returned a record that is already in flight");
            return false;
        }
        self.metrics.set_in_flight(self.running.len());
        debug!(record_id, "Dequeued record");

        let ctx = HandlerContext::new(record_id, self.options.name.clone(), cancellation);
        let invocation = Invocation {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            metrics: Arc::clone(&self.metrics),
        };

        let guard = InFlightGuard {
            record_id,
            running: Arc::clone(&self.running),
            metrics: Arc::clone(&self.metrics),
            _permit: permit,
        };

        self.handler_tasks.spawn(async move {
            let _guard = guard;
            invocation.run(ctx, record).await;
        });

        true
    }

    fn spawn_heartbeat_loop(&self, stop: CancellationToken) -> Option<JoinHandle<()>> {
        if self.options.heartbeat_interval.is_zero() {
            return None;
        }

        let heartbeat = HeartbeatLoop {
            name: self.options.name.clone(),
            interval: self.options.heartbeat_interval,
            store: Arc::clone(&self.store),
            running: Arc::clone(&self.running),
            clock: Arc::clone(&self.heartbeat_clock),
            metrics: Arc::clone(&self.metrics),
        };
        Some(tokio::spawn(heartbeat.run(stop)))
    }

    fn spawn_deadline_watcher(&self, stop: CancellationToken) -> Option<JoinHandle<()>> {
        let max_active_time = self.options.max_active_time;
        if max_active_time.is_zero() {
            return None;
        }

        let name = self.options.name.clone();
        let sleep = self.shutdown_clock.sleep(max_active_time);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = sleep => {
                    info!(
                        worker = %name,
                        max_active_time_ms = max_active_time.as_millis() as u64,
                        "Max active time reached"
                    );
                    shutdown.cancel();
                }
            }
        }))
    }
}

impl<R: Record> std::fmt::Debug for Worker<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.options.name)
            .field("status", &self.status())
            .field("in_flight", &self.running.len())
            .finish()
    }
}

/// Keeps a record in the in-flight set and its handler slot taken
///
/// Dropping the guard removes the record before the slot is released, so the
/// set never holds more than `num_handlers` entries, even if the task unwinds.
struct InFlightGuard {
    record_id: RecordId,
    running: Arc<RunningSet>,
    metrics: Arc<WorkerMetrics>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running.remove(self.record_id);
        self.metrics.set_in_flight(self.running.len());
    }
}

/// Everything a handler task needs once its record has been claimed
struct Invocation<R: Record> {
    store: Arc<dyn Store<R>>,
    handler: Arc<dyn Handler<R>>,
    metrics: Arc<WorkerMetrics>,
}

impl<R: Record> Invocation<R> {
    async fn run(self, ctx: HandlerContext, record: R) {
        let record_id = ctx.record_id;
        let hooks = self.handler.hooks();

        let pre_handle = match hooks {
            Some(hooks) => catch_panic(hooks.pre_handle(&ctx, &record)).await,
            None => Ok(()),
        };

        let started = Instant::now();
        let result = match pre_handle {
            Ok(()) => {
                let result = catch_panic(self.handler.handle(&ctx, &record))
                    .await
                    .unwrap_or_else(|panic| Err(anyhow::anyhow!("handler panicked: {panic}")));
                self.metrics.handle.observe(started.elapsed(), result.is_ok());
                result
            }
            Err(panic) => Err(anyhow::anyhow!("pre_handle hook panicked: {panic}")),
        };
        let elapsed = started.elapsed();

        if let Some(hooks) = hooks {
            if let Err(panic) = catch_panic(hooks.post_handle(&ctx, &record)).await {
                warn!(record_id, panic = %panic, "post_handle hook panicked");
            }
        }

        let outcome = HandleOutcome::classify(&result);
        debug!(
            record_id,
            outcome = outcome.as_str(),
            duration_ms = elapsed.as_millis() as u64,
            "Handler finished"
        );

        if let Err(panic) = catch_panic(self.report(record_id, &outcome)).await {
            error!(
                record_id,
                outcome = outcome.as_str(),
                panic = %panic,
                "Store panicked while reporting record outcome"
            );
        }
    }

    async fn report(&self, record_id: RecordId, outcome: &HandleOutcome) {
        let started = Instant::now();
        let (result, operation) = match outcome {
            HandleOutcome::Completed => (
                self.store.mark_complete(record_id).await,
                &self.metrics.mark_complete,
            ),
            HandleOutcome::Errored(message) => {
                warn!(record_id, error = %message, "Handler failed; record will be retried");
                (
                    self.store.mark_errored(record_id, message).await,
                    &self.metrics.mark_errored,
                )
            }
            HandleOutcome::Failed(message) => {
                warn!(record_id, error = %message, "Handler failed permanently");
                (
                    self.store.mark_failed(record_id, message).await,
                    &self.metrics.mark_failed,
                )
            }
        };
        operation.observe(started.elapsed(), result.is_ok());

        match result {
            Ok(true) => match outcome {
                HandleOutcome::Completed => self.metrics.record_completed(),
                HandleOutcome::Errored(_) => self.metrics.record_errored(),
                HandleOutcome::Failed(_) => self.metrics.record_failed(),
            },
            Ok(false) => {
                warn!(
                    record_id,
                    outcome = outcome.as_str(),
                    "Record no longer owned by this worker; outcome dropped"
                );
            }
            Err(e) => {
                error!(
                    record_id,
                    outcome = outcome.as_str(),
                    error = %e,
                    "Failed to report record outcome"
                );
            }
        }
    }
}

/// Run a future, turning a panic into its message
async fn catch_panic<F: Future>(future: F) -> Result<F::Output, String> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()).to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
