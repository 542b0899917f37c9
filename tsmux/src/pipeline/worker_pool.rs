//! Adaptive worker pool that runs one conversion per admitted job.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::capacity::{CapacityController, CapacityPermit};
use super::error_index::ErrorIndex;
use super::events::{PipelineEvent, RunCounters, RunSummary};
use super::jobs::JobTable;
use crate::domain::{JobRecord, output_path_for};
use crate::logging::ConversionJournal;
use crate::monitor::ResourceSampler;
use crate::runner::{ConversionRequest, ConversionRunner, OutcomeStatus, ProgressReporter};
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Default interval between resource samples.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a conversion pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Interval between resource samples.
    pub monitor_interval: Duration,
    /// When false, capacity stays at the run's maximum.
    pub monitor_enabled: bool,
    /// Events a slow subscriber may fall behind before it lags.
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            monitor_enabled: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound (and starting value) of the worker capacity.
    pub max_workers: usize,
    pub use_acceleration: bool,
}

impl RunOptions {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            use_acceleration: true,
        }
    }

    pub fn with_acceleration(mut self, use_acceleration: bool) -> Self {
        self.use_acceleration = use_acceleration;
        self
    }
}

/// Result of [`ConversionPool::start_conversion`].
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// Another run was active; nothing was changed.
    AlreadyRunning,
    Finished(RunSummary),
}

impl StartOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::AlreadyRunning => None,
            Self::Finished(summary) => Some(summary),
        }
    }
}

/// State shared with the job tasks of a run.
struct Shared {
    runner: Arc<dyn ConversionRunner>,
    journal: Arc<dyn ConversionJournal>,
    jobs: JobTable,
    errors: ErrorIndex,
    counters: Mutex<RunCounters>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

/// Runs conversions with a worker capacity that follows host pressure.
pub struct ConversionPool {
    shared: Arc<Shared>,
    sampler: Arc<dyn ResourceSampler>,
    config: PoolConfig,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    capacity: Mutex<Option<Arc<CapacityController>>>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConversionPool {
    pub fn new(
        runner: Arc<dyn ConversionRunner>,
        sampler: Arc<dyn ResourceSampler>,
        journal: Arc<dyn ConversionJournal>,
        config: PoolConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                runner,
                journal,
                jobs: JobTable::new(),
                errors: ErrorIndex::new(),
                counters: Mutex::new(RunCounters::default()),
                event_tx,
            }),
            sampler,
            config,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            capacity: Mutex::new(None),
        }
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the job table of the current (or last) run.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.shared.jobs.snapshot()
    }

    /// Counters of the current (or last) run.
    pub fn counters(&self) -> RunCounters {
        *self.shared.counters.lock()
    }

    /// Capacity of the current (or last) run; 0 before the first run.
    pub fn capacity(&self) -> usize {
        self.capacity
            .lock()
            .as_ref()
            .map_or(0, |controller| controller.capacity())
    }

    /// Last failure message recorded for `input`.
    pub fn last_error(&self, input: &Path) -> Option<String> {
        self.shared.errors.get(input)
    }

    pub fn clear_error(&self, input: &Path) {
        self.shared.errors.clear(input);
    }

    /// Request cancellation of the active run. Never blocks.
    pub fn stop_conversion(&self) {
        if self.is_running() {
            info!("Stopping conversion run");
        }
        self.cancel.lock().cancel();
        if let Some(capacity) = self.capacity.lock().as_ref() {
            capacity.close();
        }
    }

    /// Convert every admissible job in `jobs` and wait for the run to end.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without touching any state if
    /// a run is active.
    pub async fn start_conversion(
        &self,
        jobs: Vec<JobRecord>,
        options: RunOptions,
    ) -> Result<StartOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Conversion already running, ignoring start request");
            return Ok(StartOutcome::AlreadyRunning);
        }
        let _running = RunningFlag(&self.running);

        if options.max_workers == 0 {
            return Err(Error::validation("max_workers must be at least 1"));
        }
        if !self.shared.runner.is_available() {
            return Err(Error::ToolMissing {
                path: self.shared.runner.tool_path().to_path_buf(),
            });
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        self.shared.jobs.replace(jobs);
        *self.shared.counters.lock() = RunCounters::default();

        let capacity = Arc::new(CapacityController::new(
            options.max_workers,
            options.max_workers,
        ));
        *self.capacity.lock() = Some(Arc::clone(&capacity));

        info!(
            jobs = self.shared.jobs.len(),
            max_workers = options.max_workers,
            use_acceleration = options.use_acceleration,
            tool = self.shared.runner.name(),
            "Starting conversion run"
        );

        let started = Instant::now();
        let monitor_token = cancel.child_token();
        let monitor = self.spawn_monitor(
            Arc::clone(&capacity),
            options.max_workers,
            monitor_token.clone(),
        );

        self.admit(&capacity, &cancel, options.use_acceleration)
            .await;

        monitor_token.cancel();
        if let Some(monitor) = monitor
            && let Err(e) = monitor.await
        {
            warn!(error = %e, "Capacity monitor ended abnormally");
        }

        let summary = RunSummary {
            counters: self.counters(),
            stopped: cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            completed = summary.counters.completed,
            failed = summary.counters.failed,
            cancelled = summary.counters.cancelled,
            stopped = summary.stopped,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Conversion run finished"
        );
        self.shared
            .emit(PipelineEvent::PipelineCompleted { summary });

        Ok(StartOutcome::Finished(summary))
    }

    /// Admit jobs in order as permits become available, then wait for every
    /// admitted job to finish.
    async fn admit(
        &self,
        capacity: &Arc<CapacityController>,
        cancel: &CancellationToken,
        use_acceleration: bool,
    ) {
        let mut tasks = JoinSet::new();

        for input in self.shared.jobs.admissible() {
            if cancel.is_cancelled() {
                break;
            }
            // Stopping closes the gate, which wakes a pending acquire.
            let Some(permit) = capacity.acquire().await else {
                debug!("Capacity gate closed, admitting no more jobs");
                break;
            };

            let readmitted = match self.shared.jobs.begin(&input) {
                Ok(readmitted) => readmitted,
                Err(e) => {
                    warn!(input = %input.display(), error = %e, "Skipping job that cannot start");
                    continue;
                }
            };
            {
                let mut counters = self.shared.counters.lock();
                counters.admitted += 1;
                if readmitted {
                    counters.readmitted_failed += 1;
                }
            }

            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                shared.run_job(input, use_acceleration, cancel, permit).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Conversion task aborted");
            }
        }
    }

    fn spawn_monitor(
        &self,
        capacity: Arc<CapacityController>,
        max_workers: usize,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.config.monitor_enabled {
            debug!("Capacity monitor disabled");
            return None;
        }

        let sampler = Arc::clone(&self.sampler);
        let shared = Arc::clone(&self.shared);
        let interval = self.config.monitor_interval;

        Some(tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "Capacity monitor started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let current = capacity.capacity();
                        let sampler = Arc::clone(&sampler);
                        let recommended = match tokio::task::spawn_blocking(move || {
                            sampler.recommended_workers(current, max_workers)
                        })
                        .await
                        {
                            Ok(recommended) => recommended,
                            Err(e) => {
                                warn!(error = %e, "Resource sampling failed");
                                continue;
                            }
                        };

                        if let Some(updated) = capacity.set_capacity(recommended) {
                            info!(from = current, to = updated, "Worker capacity adjusted");
                            shared.emit(PipelineEvent::CapacityChanged { capacity: updated });
                        }
                    }
                }
            }

            debug!("Capacity monitor stopped");
        }))
    }
}

impl Shared {
    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    async fn run_job(
        self: Arc<Self>,
        input: PathBuf,
        use_acceleration: bool,
        cancel: CancellationToken,
        permit: CapacityPermit,
    ) {
        let body = AssertUnwindSafe(self.execute(&input, use_acceleration, &cancel))
            .catch_unwind()
            .await;

        if let Err(panic) = body {
            let detail = panic_message(panic.as_ref());
            self.finish_failed(
                &input,
                format!("conversion task panicked: {detail}"),
                Some(&detail),
            )
            .await;
        }

        drop(permit);
    }

    async fn execute(self: &Arc<Self>, input: &Path, use_acceleration: bool, cancel: &CancellationToken) {
        self.emit(PipelineEvent::JobStarted {
            input_path: input.to_path_buf(),
        });
        self.journal.started(input).await;
        let started = Instant::now();

        let output = output_path_for(input);
        let output_existed = tokio::fs::try_exists(&output).await.unwrap_or(true);
        let request = ConversionRequest::new(input, &output).with_acceleration(use_acceleration);
        let outcome = self
            .runner
            .run(&request, &self.progress_reporter(input), cancel)
            .await;
        self.journal.tool_output(input, &outcome.raw_log).await;

        match outcome.status {
            OutcomeStatus::Succeeded => match finalize_success(input, &output).await {
                Ok(()) => self.finish_completed(input, started.elapsed()).await,
                Err(e) => {
                    let detail = e.to_string();
                    self.finish_failed(input, detail.clone(), Some(&detail))
                        .await;
                }
            },
            OutcomeStatus::Failed => {
                if !output_existed {
                    discard_partial_output(&output).await;
                }
                self.finish_failed(input, outcome.error_message, None)
                    .await;
            }
            OutcomeStatus::Cancelled => {
                if !output_existed {
                    discard_partial_output(&output).await;
                }
                self.finish_cancelled(input).await;
            }
        }
    }

    fn progress_reporter(self: &Arc<Self>, input: &Path) -> ProgressReporter {
        let shared = Arc::clone(self);
        let input = input.to_path_buf();
        ProgressReporter::new(move |pct| {
            if let Some(progress_pct) = shared.jobs.advance(&input, pct) {
                shared.emit(PipelineEvent::Progress {
                    input_path: input.clone(),
                    progress_pct,
                });
            }
        })
    }

    async fn finish_completed(&self, input: &Path, elapsed: Duration) {
        if let Err(e) = self.jobs.complete(input) {
            warn!(input = %input.display(), error = %e, "Could not mark job completed");
            return;
        }
        self.errors.clear(input);
        self.counters.lock().completed += 1;
        self.journal.completed(input, elapsed).await;
        self.emit(PipelineEvent::JobCompleted {
            input_path: input.to_path_buf(),
        });
    }

    async fn finish_failed(&self, input: &Path, message: String, fault: Option<&str>) {
        if let Err(e) = self.jobs.fail(input) {
            warn!(input = %input.display(), error = %e, "Could not mark job failed");
            return;
        }
        self.errors.record(input, message.clone());
        self.counters.lock().failed += 1;
        self.journal.failed(input, &message, fault).await;
        self.emit(PipelineEvent::JobFailed {
            input_path: input.to_path_buf(),
            message,
        });
    }

    async fn finish_cancelled(&self, input: &Path) {
        if let Err(e) = self.jobs.cancel(input) {
            warn!(input = %input.display(), error = %e, "Could not mark job cancelled");
            return;
        }
        self.counters.lock().cancelled += 1;
        self.journal.cancelled(input).await;
        self.emit(PipelineEvent::JobCancelled {
            input_path: input.to_path_buf(),
        });
    }
}

/// Confirm the output landed, then remove the source.
async fn finalize_success(input: &Path, output: &Path) -> Result<()> {
    let exists = tokio::fs::try_exists(output)
        .await
        .map_err(|e| io_error("checking converted output", output, e))?;
    if !exists {
        return Err(Error::Other(format!(
            "conversion reported success but {} was not created",
            output.display()
        )));
    }

    tokio::fs::remove_file(input)
        .await
        .map_err(|e| io_error("removing converted input", input, e))
}

/// Remove what an interrupted or failed attempt left at `output`, so a later
/// attempt does not trip over it.
async fn discard_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!(output = %output.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(output = %output.display(), error = %e, "Failed to remove partial output"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
