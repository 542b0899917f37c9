//! Conversion job records and their lifecycle.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::utils::fs::paths_equal;
use crate::{Error, Result};

/// Container extension of the converted output.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Upper bound for progress while a job is still running.
///
/// Only a confirmed successful exit moves a job to 100.
pub const RUNNING_PROGRESS_CEILING: f64 = 99.0;

/// Status of a conversion job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for admission.
    #[default]
    Pending,
    /// Holding a permit, the tool is running.
    Running,
    /// Converted; the source has been removed.
    Completed,
    /// The tool or the orchestration around it failed.
    Failed,
    /// Stopped by a pipeline-wide cancellation.
    Cancelled,
}

impl JobStatus {
    /// Whether the job reached an outcome for the current run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the scheduler may (re)admit a job in this status.
    pub fn is_admissible(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// One input file's conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub input_path: PathBuf,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub progress_pct: f64,
}

impl JobRecord {
    /// A freshly discovered job.
    pub fn pending(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            status: JobStatus::Pending,
            progress_pct: 0.0,
        }
    }

    /// Where the converted file is written.
    ///
    /// Same directory and stem as the input with the output extension; if that
    /// would overwrite the input itself, `_remux` is appended to the stem.
    pub fn output_path(&self) -> PathBuf {
        output_path_for(&self.input_path)
    }

    /// Pending -> Running.
    pub fn begin(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending, JobStatus::Running)?;
        self.progress_pct = 0.0;
        Ok(())
    }

    /// Record a progress report. Returns whether the stored value changed.
    ///
    /// Reports are ignored unless the job is running, and never move
    /// progress backwards or up to 100.
    pub fn advance(&mut self, pct: f64) -> bool {
        if self.status != JobStatus::Running || !pct.is_finite() {
            return false;
        }
        let pct = pct.clamp(0.0, RUNNING_PROGRESS_CEILING);
        if pct > self.progress_pct {
            self.progress_pct = pct;
            true
        } else {
            false
        }
    }

    /// Running -> Completed.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Completed)?;
        self.progress_pct = 100.0;
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(&mut self) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Failed)
    }

    /// Running -> Cancelled.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Cancelled)
    }

    /// Put a job that did not complete back in the queue.
    pub fn requeue(&mut self) -> Result<()> {
        if self.status == JobStatus::Completed {
            return Err(invalid(self.status, JobStatus::Pending));
        }
        self.status = JobStatus::Pending;
        self.progress_pct = 0.0;
        Ok(())
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != from {
            return Err(invalid(self.status, to));
        }
        self.status = to;
        Ok(())
    }
}

fn invalid(from: JobStatus, to: JobStatus) -> Error {
    Error::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Derive the output path for an input container.
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or_else(|| Path::new(""));

    let candidate = parent.join(format!("{stem}.{OUTPUT_EXTENSION}"));
    if paths_equal(&candidate, input) {
        parent.join(format!("{stem}_remux.{OUTPUT_EXTENSION}"))
    } else {
        candidate
    }
}
