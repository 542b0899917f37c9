//! The job table of the active run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::warn;

use crate::domain::{JobRecord, JobStatus};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    jobs: Vec<JobRecord>,
    index: HashMap<PathBuf, usize>,
}

/// Ordered job records with lookup by input path.
///
/// Every mutation takes the write lock briefly; nothing here awaits.
#[derive(Debug, Default)]
pub struct JobTable {
    inner: RwLock<Inner>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table. Later duplicates of an input path are dropped.
    pub fn replace(&self, jobs: Vec<JobRecord>) {
        let mut inner = Inner::default();
        for job in jobs {
            if inner.index.contains_key(&job.input_path) {
                warn!(input = %job.input_path.display(), "Duplicate job ignored");
                continue;
            }
            inner.index.insert(job.input_path.clone(), inner.jobs.len());
            inner.jobs.push(job);
        }
        *self.inner.write() = inner;
    }

    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.inner.read().jobs.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }

    /// Input paths of jobs eligible for admission, in table order.
    pub fn admissible(&self) -> Vec<PathBuf> {
        self.inner
            .read()
            .jobs
            .iter()
            .filter(|job| job.status.is_admissible())
            .map(|job| job.input_path.clone())
            .collect()
    }

    #[cfg(test)]
    fn count_status(&self, status: JobStatus) -> usize {
        self.inner
            .read()
            .jobs
            .iter()
            .filter(|job| job.status == status)
            .count()
    }

    fn with_job<R>(&self, input: &Path, f: impl FnOnce(&mut JobRecord) -> R) -> Result<R> {
        let mut inner = self.inner.write();
        let Some(&i) = inner.index.get(input) else {
            return Err(Error::Other(format!("unknown job {}", input.display())));
        };
        Ok(f(&mut inner.jobs[i]))
    }

    /// Admit a job: a failed job is requeued first, then moved to running.
    ///
    /// Returns whether the job was a re-admitted failure.
    pub fn begin(&self, input: &Path) -> Result<bool> {
        self.with_job(input, |job| -> Result<bool> {
            let readmitted = job.status == JobStatus::Failed;
            if readmitted {
                job.requeue()?;
            }
            job.begin()?;
            Ok(readmitted)
        })?
    }

    /// Record progress; returns the stored value when it moved.
    pub fn advance(&self, input: &Path, pct: f64) -> Option<f64> {
        self.with_job(input, |job| job.advance(pct).then_some(job.progress_pct))
            .ok()
            .flatten()
    }

    pub fn complete(&self, input: &Path) -> Result<()> {
        self.with_job(input, JobRecord::complete)?
    }

    pub fn fail(&self, input: &Path) -> Result<()> {
        self.with_job(input, JobRecord::fail)?
    }

    pub fn cancel(&self, input: &Path) -> Result<()> {
        self.with_job(input, JobRecord::cancel)?
    }
}
