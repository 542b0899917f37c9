//! Logging setup and per-conversion journaling.
//!
//! This module provides:
//! - Subscriber initialization with console and daily-rolling file output
//! - Log file retention cleanup (deletes logs older than 7 days)
//! - Local timezone timestamps for logs
//! - The [`ConversionJournal`] boundary the pipeline reports to

mod journal;

pub use journal::{ConversionJournal, FileJournal, TracingJournal};

use std::path::Path;

use chrono::{Local, NaiveDate, Utc};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "tsmux=info,process_utils=info";

/// Prefix of the daily rolling log files (`tsmux.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "tsmux.log";

/// Log retention period in days.
pub const LOG_RETENTION_DAYS: i64 = 7;

/// Console verbosity selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    /// Map `-q` / repeated `-v` flags to a verbosity.
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "tsmux=warn,process_utils=warn",
            Self::Normal => DEFAULT_LOG_FILTER,
            Self::Verbose => "tsmux=debug,process_utils=debug",
            Self::Trace => "tsmux=trace,process_utils=trace",
        }
    }
}

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize logging.
///
/// # Arguments
/// * `log_dir` - Directory for log files
/// * `verbosity` - Console verbosity when `RUST_LOG` is unset
///
/// # Returns
/// The file writer guard; keep it alive for the app lifetime.
pub fn init_logging(log_dir: &Path, verbosity: Verbosity) -> crate::Result<WorkerGuard> {
    fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_timer(LocalTimer),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Date encoded in a rolling log file name.
fn log_file_date(filename: &str) -> Option<NaiveDate> {
    let date_str = filename.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()
}

/// Delete log files older than the specified number of days.
///
/// Returns the number of files removed.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(log_file_date)
        else {
            continue;
        };

        if file_date < cutoff {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 3), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(true, 2), Verbosity::Quiet);
        assert_eq!(Verbosity::Normal.filter_directive(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_log_file_date() {
        assert_eq!(
            log_file_date("tsmux.log.2024-03-01"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(log_file_date("tsmux.log"), None);
        assert_eq!(log_file_date("other.log.2024-03-01"), None);
        assert_eq!(log_file_date("tsmux.log.garbage"), None);
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();

        let old = dir.path().join("tsmux.log.2000-01-01");
        let current = dir.path().join(format!("tsmux.log.{today}"));
        let unrelated = dir.path().join("notes.txt");
        for path in [&old, &current, &unrelated] {
            std::fs::write(path, b"x").unwrap();
        }

        let removed = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS)
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(current.exists());
        assert!(unrelated.exists());
    }
}
