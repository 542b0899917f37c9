//! Notifications the pool publishes while a run is in progress.

use std::path::PathBuf;
use std::time::Duration;

/// Per-run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunCounters {
    /// Jobs that acquired a permit and started.
    pub admitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Admitted jobs that were `Failed` before this run.
    pub readmitted_failed: usize,
}

impl RunCounters {
    /// Jobs that reached an outcome.
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Summary published when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub counters: RunCounters,
    /// Whether the run was stopped before every job was admitted or finished.
    pub stopped: bool,
    pub elapsed: Duration,
}

/// Events broadcast by [`ConversionPool`](super::ConversionPool).
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    JobStarted {
        input_path: PathBuf,
    },
    Progress {
        input_path: PathBuf,
        progress_pct: f64,
    },
    JobCompleted {
        input_path: PathBuf,
    },
    JobFailed {
        input_path: PathBuf,
        message: String,
    },
    JobCancelled {
        input_path: PathBuf,
    },
    CapacityChanged {
        capacity: usize,
    },
    /// Fired exactly once per run, after every admitted job is terminal.
    PipelineCompleted {
        summary: RunSummary,
    },
}

impl PipelineEvent {
    /// Whether this event ends a job.
    pub fn is_job_outcome(&self) -> bool {
        matches!(
            self,
            Self::JobCompleted { .. } | Self::JobFailed { .. } | Self::JobCancelled { .. }
        )
    }
}
