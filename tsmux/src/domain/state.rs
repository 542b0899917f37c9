//! The persisted, resumable snapshot of a conversion pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{JobRecord, JobStatus};

fn default_use_acceleration() -> bool {
    true
}

fn default_worker_cap() -> usize {
    2
}

/// Everything needed to continue a batch later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub folder_path: PathBuf,
    pub jobs: Vec<JobRecord>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub completed_count: usize,
    #[serde(default)]
    pub failed_count: usize,
    #[serde(default = "default_use_acceleration")]
    pub use_acceleration: bool,
    #[serde(default = "default_worker_cap")]
    pub worker_cap: usize,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_modified_at: DateTime<Utc>,
}

impl PipelineState {
    /// Start a new batch over `jobs`.
    pub fn new(
        folder_path: impl Into<PathBuf>,
        jobs: Vec<JobRecord>,
        use_acceleration: bool,
        worker_cap: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            folder_path: folder_path.into(),
            total_count: jobs.len(),
            jobs,
            completed_count: 0,
            failed_count: 0,
            use_acceleration,
            worker_cap,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// `completed + failed <= total`.
    pub fn counts_consistent(&self) -> bool {
        self.completed_count + self.failed_count <= self.total_count
    }

    /// Whether the recorded total no longer matches the job list.
    pub fn counts_diverged(&self) -> bool {
        self.total_count != self.jobs.len()
    }

    /// Number of jobs in the given status.
    pub fn count_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }

    /// Number of jobs a run would (re)admit.
    pub fn remaining(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status.is_admissible())
            .count()
    }

    pub fn touch(&mut self) {
        self.last_modified_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PipelineState {
        PipelineState::new(
            "/rec",
            vec![JobRecord::pending("/rec/a.ts"), JobRecord::pending("/rec/b.ts")],
            true,
            3,
        )
    }

    #[test]
    fn test_new_state_counts() {
        let state = sample_state();
        assert_eq!(state.total_count, 2);
        assert_eq!(state.remaining(), 2);
        assert!(state.counts_consistent());
        assert!(!state.counts_diverged());
        assert_eq!(state.created_at, state.last_modified_at);
    }

    #[test]
    fn test_counts_consistency() {
        let mut state = sample_state();
        state.completed_count = 2;
        state.failed_count = 1;
        assert!(!state.counts_consistent());
    }

    #[test]
    fn test_field_names_are_camel_case() {
        let json = serde_json::to_value(sample_state()).unwrap();
        for key in [
            "folderPath",
            "jobs",
            "totalCount",
            "completedCount",
            "failedCount",
            "useAcceleration",
            "workerCap",
            "createdAt",
            "lastModifiedAt",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let state: PipelineState =
            serde_json::from_str(r#"{"folderPath": "/rec", "jobs": []}"#).unwrap();
        assert!(state.use_acceleration);
        assert_eq!(state.worker_cap, 2);
        assert_eq!(state.total_count, 0);
    }

    #[test]
    fn test_jobs_are_required() {
        assert!(serde_json::from_str::<PipelineState>(r#"{"folderPath": "/rec"}"#).is_err());
        assert!(
            serde_json::from_str::<PipelineState>(r#"{"folderPath": "/rec", "jobs": null}"#)
                .is_err()
        );
    }
}
