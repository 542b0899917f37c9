use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;

/// Message carried by a cancelled outcome.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// A single file to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Ask the tool for hardware-accelerated decoding.
    pub use_acceleration: bool,
}

impl ConversionRequest {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            use_acceleration: true,
        }
    }

    pub fn with_acceleration(mut self, use_acceleration: bool) -> Self {
        self.use_acceleration = use_acceleration;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of one conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub status: OutcomeStatus,
    /// Empty on success.
    pub error_message: String,
    /// Everything the tool wrote to its diagnostic stream.
    pub raw_log: String,
}

impl ConversionOutcome {
    pub fn succeeded(raw_log: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            error_message: String::new(),
            raw_log: raw_log.into(),
        }
    }

    pub fn failed(message: impl Into<String>, raw_log: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            error_message: message.into(),
            raw_log: raw_log.into(),
        }
    }

    pub fn cancelled(raw_log: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            error_message: CANCELLED_MESSAGE.to_string(),
            raw_log: raw_log.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Runs one external conversion per call.
///
/// Implementations never return errors: spawn failures, bad exits and
/// cancellation are all expressed through the [`ConversionOutcome`].
#[async_trait]
pub trait ConversionRunner: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Path of the configured tool.
    fn tool_path(&self) -> &Path;

    /// Whether the tool can be found. Must not spawn a process.
    fn is_available(&self) -> bool;

    async fn run(
        &self,
        request: &ConversionRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ConversionOutcome;
}
