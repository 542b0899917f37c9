//! A conversion session: one batch's persisted state bound to a pool.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::{JobRecord, JobStatus, PipelineState};
use crate::persistence::{LoadedTask, task_file};
use crate::pipeline::{ConversionPool, RunOptions, StartOutcome};
use crate::utils::fs::scan_inputs;
use crate::{Error, Result};

/// Counters of the state when the active run began.
#[derive(Debug, Clone, Copy)]
struct RunBase {
    completed: usize,
    failed: usize,
}

/// Owns a [`PipelineState`] and folds the pool's progress into it.
pub struct Session {
    pool: Arc<ConversionPool>,
    state: Mutex<PipelineState>,
    base: Mutex<Option<RunBase>>,
}

impl Session {
    /// Build a fresh state from the inputs found in `folder`.
    pub fn scan(folder: &Path, use_acceleration: bool, worker_cap: usize) -> Result<PipelineState> {
        let jobs: Vec<JobRecord> = scan_inputs(folder)?
            .into_iter()
            .map(JobRecord::pending)
            .collect();
        info!(folder = %folder.display(), jobs = jobs.len(), "Scanned input folder");
        Ok(PipelineState::new(folder, jobs, use_acceleration, worker_cap))
    }

    pub fn new(state: PipelineState, pool: Arc<ConversionPool>) -> Self {
        Self {
            pool,
            state: Mutex::new(state),
            base: Mutex::new(None),
        }
    }

    /// Resume a loaded task. Jobs left running or cancelled by an earlier
    /// process go back to the queue.
    pub fn from_task(loaded: LoadedTask, pool: Arc<ConversionPool>) -> Self {
        let mut state = loaded.state;
        let mut requeued = 0;
        for job in &mut state.jobs {
            if matches!(job.status, JobStatus::Running | JobStatus::Cancelled) && job.requeue().is_ok()
            {
                requeued += 1;
            }
        }
        if requeued > 0 {
            debug!(requeued, "Requeued interrupted jobs");
        }
        Self::new(state, pool)
    }

    pub fn pool(&self) -> &Arc<ConversionPool> {
        &self.pool
    }

    /// The state including the progress of an active run.
    pub fn snapshot(&self) -> PipelineState {
        let mut state = self.state.lock().clone();
        if let Some(base) = *self.base.lock() {
            let counters = self.pool.counters();
            state.jobs = self.pool.jobs();
            state.completed_count = base.completed + counters.completed;
            state.failed_count =
                base.failed.saturating_sub(counters.readmitted_failed) + counters.failed;
        }
        state.touch();
        state
    }

    /// Persist the current snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        task_file::save(path, &self.snapshot())
    }

    /// [`save`](Self::save) on the blocking pool, for use from async code.
    pub async fn save_async(self: &Arc<Self>, path: &Path) -> Result<()> {
        let session = Arc::clone(self);
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || session.save(&target))
            .await
            .map_err(|e| Error::Other(format!("task file save did not complete: {e}")))?
    }

    /// Run the remaining jobs and fold the result into the session state.
    pub async fn run(&self, options: RunOptions) -> Result<StartOutcome> {
        if self.pool.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let jobs = {
            let mut state = self.state.lock();
            state.worker_cap = options.max_workers;
            state.use_acceleration = options.use_acceleration;
            *self.base.lock() = Some(RunBase {
                completed: state.completed_count,
                failed: state.failed_count,
            });
            state.jobs.clone()
        };

        let outcome = self.pool.start_conversion(jobs, options).await;

        if matches!(outcome, Ok(StartOutcome::Finished(_))) {
            let merged = self.snapshot();
            *self.state.lock() = merged;
        }
        *self.base.lock() = None;
        outcome
    }
}
