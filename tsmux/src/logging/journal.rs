use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::utils::fs::io_error;

/// Where the pipeline reports per-conversion lifecycle and tool output.
///
/// Journals never fail the job they describe; write problems are logged
/// and swallowed.
#[async_trait]
pub trait ConversionJournal: Send + Sync + 'static {
    async fn started(&self, input: &Path);

    async fn completed(&self, input: &Path, elapsed: Duration);

    /// `fault` carries detail when the failure came from the orchestration
    /// around the tool rather than the tool itself.
    async fn failed(&self, input: &Path, message: &str, fault: Option<&str>);

    async fn cancelled(&self, input: &Path);

    async fn tool_output(&self, input: &Path, raw_log: &str);
}

/// Journal that only emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingJournal;

#[async_trait]
impl ConversionJournal for TracingJournal {
    async fn started(&self, input: &Path) {
        info!(input = %input.display(), "Conversion started");
    }

    async fn completed(&self, input: &Path, elapsed: Duration) {
        info!(
            input = %input.display(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Conversion completed"
        );
    }

    async fn failed(&self, input: &Path, message: &str, fault: Option<&str>) {
        match fault {
            Some(fault) => error!(input = %input.display(), %message, %fault, "Conversion faulted"),
            None => warn!(input = %input.display(), %message, "Conversion failed"),
        }
    }

    async fn cancelled(&self, input: &Path) {
        info!(input = %input.display(), "Conversion cancelled");
    }

    async fn tool_output(&self, input: &Path, raw_log: &str) {
        debug!(
            input = %input.display(),
            lines = raw_log.lines().count(),
            "Conversion tool output captured"
        );
    }
}

/// Journal that also keeps each conversion's raw tool output on disk under
/// `<log_dir>/conversions/`.
#[derive(Debug, Clone)]
pub struct FileJournal {
    conversions_dir: PathBuf,
    events: TracingJournal,
}

impl FileJournal {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            conversions_dir: log_dir.as_ref().join("conversions"),
            events: TracingJournal,
        }
    }

    pub fn conversions_dir(&self) -> &Path {
        &self.conversions_dir
    }

    /// `<stem>_ffmpeg_<YYYYmmdd_HHMMSS>.log`
    fn output_file_for(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.conversions_dir
            .join(format!("{stem}_ffmpeg_{stamp}.log"))
    }

    async fn write_output(&self, input: &Path, raw_log: &str) -> crate::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.conversions_dir)
            .await
            .map_err(|e| io_error("creating conversion log directory", &self.conversions_dir, e))?;

        let path = self.output_file_for(input);
        tokio::fs::write(&path, raw_log)
            .await
            .map_err(|e| io_error("writing conversion log", &path, e))?;
        Ok(path)
    }
}

#[async_trait]
impl ConversionJournal for FileJournal {
    async fn started(&self, input: &Path) {
        self.events.started(input).await;
    }

    async fn completed(&self, input: &Path, elapsed: Duration) {
        self.events.completed(input, elapsed).await;
    }

    async fn failed(&self, input: &Path, message: &str, fault: Option<&str>) {
        self.events.failed(input, message, fault).await;
    }

    async fn cancelled(&self, input: &Path) {
        self.events.cancelled(input).await;
    }

    async fn tool_output(&self, input: &Path, raw_log: &str) {
        if raw_log.is_empty() {
            return;
        }
        match self.write_output(input, raw_log).await {
            Ok(path) => debug!(input = %input.display(), log = %path.display(), "Saved conversion tool output"),
            Err(e) => warn!(input = %input.display(), error = %e, "Failed to save conversion tool output"),
        }
    }
}
