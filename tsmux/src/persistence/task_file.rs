//! Task files: the pipeline state as pretty-printed JSON on disk.
//!
//! Saves replace the whole file atomically. Loads validate the structure,
//! require the working folder to still exist and drop jobs whose input file
//! is gone. Callers keep at most one save in flight per file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::domain::PipelineState;
use crate::utils::fs::{ensure_parent_dir_sync, io_error};
use crate::{Error, Result};

/// A state read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTask {
    pub state: PipelineState,
    /// Jobs removed because their input file no longer exists.
    pub pruned: Vec<PathBuf>,
}

impl LoadedTask {
    /// Whether the recorded total no longer matches the surviving jobs.
    pub fn counts_diverged(&self) -> bool {
        self.state.counts_diverged()
    }
}

/// Write `state` to `path`, replacing any previous content.
pub fn save(path: &Path, state: &PipelineState) -> Result<()> {
    ensure_parent_dir_sync(path)?;
    let json = serde_json::to_string_pretty(state)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| io_error("creating temporary task file", dir, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| io_error("writing task file", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| io_error("syncing task file", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| io_error("replacing task file", path, e.error))?;

    debug!(
        path = %path.display(),
        jobs = state.jobs.len(),
        completed = state.completed_count,
        "Task file saved"
    );
    Ok(())
}

fn read_state(path: &Path) -> Result<PipelineState> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::task_file(path, format!("cannot read file: {e}")))?;
    serde_json::from_str(&text).map_err(|e| Error::task_file(path, e.to_string()))
}

/// Read a task file back.
pub fn load(path: &Path) -> Result<LoadedTask> {
    let mut state = read_state(path)?;

    if !state.folder_path.is_dir() {
        return Err(Error::FolderNotFound {
            path: state.folder_path,
        });
    }

    let (kept, gone): (Vec<_>, Vec<_>) = std::mem::take(&mut state.jobs)
        .into_iter()
        .partition(|job| job.input_path.exists());
    state.jobs = kept;
    let pruned: Vec<PathBuf> = gone.into_iter().map(|job| job.input_path).collect();

    if !pruned.is_empty() {
        info!(
            path = %path.display(),
            pruned = pruned.len(),
            "Dropped jobs whose input file no longer exists"
        );
    }

    let loaded = LoadedTask { state, pruned };
    if loaded.counts_diverged() {
        warn!(
            path = %path.display(),
            total = loaded.state.total_count,
            jobs = loaded.state.jobs.len(),
            "Recorded job total differs from the jobs still present"
        );
    }
    Ok(loaded)
}

/// Cheap structural check of a task file. Never fails.
pub fn is_valid(path: &Path) -> bool {
    match read_state(path) {
        Ok(state) => !state.folder_path.as_os_str().is_empty(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Task file is not valid");
            false
        }
    }
}
