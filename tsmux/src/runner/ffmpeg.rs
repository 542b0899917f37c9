//! FFmpeg-backed conversion runner.
//!
//! Each conversion is two invocations: a probe (`-i <input>` without an
//! output) whose banner carries the input duration, and the remux itself.
//! Progress is derived from the `time=` field of the status line ffmpeg keeps
//! redrawing on stderr.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use process_utils::{diagnostic_command, locate_executable};
use tokio::process::ChildStderr;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::InspectReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parser::{failure_message, parse_duration, parse_time_field, progress_percent};
use super::progress::ProgressReporter;
use super::traits::{ConversionOutcome, ConversionRequest, ConversionRunner};

/// Duration assumed when the probe yields nothing usable.
pub const DEFAULT_FALLBACK_DURATION: Duration = Duration::from_secs(30 * 60);

/// Runs ffmpeg stream-copy remuxes.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary_path: PathBuf,
    overwrite_existing: bool,
    fallback_duration: Duration,
}

impl FfmpegRunner {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            overwrite_existing: false,
            fallback_duration: DEFAULT_FALLBACK_DURATION,
        }
    }

    /// Replace an existing output (`-y`) instead of refusing (`-n`).
    pub fn with_overwrite(mut self, overwrite_existing: bool) -> Self {
        self.overwrite_existing = overwrite_existing;
        self
    }

    pub fn with_fallback_duration(mut self, fallback: Duration) -> Self {
        self.fallback_duration = fallback;
        self
    }

    fn probe_args(input: &Path) -> Vec<OsString> {
        vec!["-hide_banner".into(), "-i".into(), input.into()]
    }

    /// Build the remux argument list.
    pub fn build_args(&self, request: &ConversionRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into()];
        args.push(if self.overwrite_existing { "-y" } else { "-n" }.into());

        if request.use_acceleration {
            args.push("-hwaccel".into());
            args.push("auto".into());
        }

        args.push("-i".into());
        args.push(request.input_path.clone().into());
        args.push("-f".into());
        args.push("mp4".into());
        args.push("-codec".into());
        args.push("copy".into());
        args.push(request.output_path.clone().into());
        args
    }

    /// Total duration of `input` in seconds.
    ///
    /// Falls back to the configured duration when the probe cannot be
    /// started, is cancelled, or its output carries no duration.
    pub async fn probe_duration(&self, input: &Path, cancel: &CancellationToken) -> f64 {
        let fallback = self.fallback_duration.as_secs_f64();

        let child = match diagnostic_command(&self.binary_path)
            .args(Self::probe_args(input))
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(input = %input.display(), error = %e, "Failed to start duration probe");
                return fallback;
            }
        };

        // Dropping the future on cancellation drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return fallback,
            output = child.wait_with_output() => output,
        };

        match output {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stderr);
                parse_duration(&text).unwrap_or_else(|| {
                    debug!(input = %input.display(), "No duration in probe output, using fallback");
                    fallback
                })
            }
            Err(e) => {
                warn!(input = %input.display(), error = %e, "Duration probe failed");
                fallback
            }
        }
    }
}

/// Drain the diagnostic stream, reporting progress as `time=` fields arrive.
///
/// The status line is redrawn with carriage returns, so both `\r` and `\n`
/// end a frame. The returned log is the stream exactly as written.
async fn read_diagnostics(
    stderr: ChildStderr,
    total_secs: f64,
    progress: &ProgressReporter,
) -> String {
    let mut raw: Vec<u8> = Vec::new();
    {
        let reader = InspectReader::new(stderr, |chunk: &[u8]| raw.extend_from_slice(chunk));
        let codec = AnyDelimiterCodec::new(b"\r\n".to_vec(), b"\n".to_vec());
        let mut frames = FramedRead::new(reader, codec);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(bytes) => {
                    if let Some(current) = parse_time_field(&String::from_utf8_lossy(&bytes)) {
                        progress.report(progress_percent(current, total_secs));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Error reading conversion tool output");
                    break;
                }
            }
        }
    }

    String::from_utf8_lossy(&raw).into_owned()
}

fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl ConversionRunner for FfmpegRunner {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn tool_path(&self) -> &Path {
        &self.binary_path
    }

    fn is_available(&self) -> bool {
        locate_executable(&self.binary_path).is_some()
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ConversionOutcome {
        if cancel.is_cancelled() {
            return ConversionOutcome::cancelled(String::new());
        }

        let total_secs = self.probe_duration(&request.input_path, cancel).await;
        if cancel.is_cancelled() {
            return ConversionOutcome::cancelled(String::new());
        }

        let args = self.build_args(request);
        debug!(
            input = %request.input_path.display(),
            output = %request.output_path.display(),
            total_secs,
            "Starting remux"
        );

        let mut child = match diagnostic_command(&self.binary_path).args(&args).spawn() {
            Ok(child) => child,
            Err(e) => {
                return ConversionOutcome::failed(
                    format!("failed to start conversion tool: {e}"),
                    String::new(),
                );
            }
        };

        let Some(stderr) = child.stderr.take() else {
            let _ = child.kill().await;
            return ConversionOutcome::failed(
                "failed to start conversion tool: diagnostic stream not captured",
                String::new(),
            );
        };

        let wait = async {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    None
                }
                status = child.wait() => Some(status),
            }
        };

        let (raw_log, exit) = tokio::join!(read_diagnostics(stderr, total_secs, progress), wait);

        match exit {
            None => {
                debug!(input = %request.input_path.display(), "Remux cancelled");
                ConversionOutcome::cancelled(raw_log)
            }
            Some(Err(e)) => ConversionOutcome::failed(
                format!("failed to wait for conversion tool: {e}"),
                raw_log,
            ),
            Some(Ok(status)) if status.success() => {
                progress.report(100.0);
                ConversionOutcome::succeeded(raw_log)
            }
            Some(Ok(status)) => {
                let message = failure_message(exit_code(&status), &raw_log);
                ConversionOutcome::failed(message, raw_log)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_build_args_with_acceleration() {
        let runner = FfmpegRunner::new("ffmpeg");
        let request = ConversionRequest::new("/rec/a.ts", "/rec/a.mp4");
        assert_eq!(
            args_as_strings(&runner.build_args(&request)),
            vec![
                "-hide_banner",
                "-nostdin",
                "-n",
                "-hwaccel",
                "auto",
                "-i",
                "/rec/a.ts",
                "-f",
                "mp4",
                "-codec",
                "copy",
                "/rec/a.mp4"
            ]
        );
    }

    #[test]
    fn test_build_args_without_acceleration_and_overwrite() {
        let runner = FfmpegRunner::new("ffmpeg").with_overwrite(true);
        let request = ConversionRequest::new("/rec/a.ts", "/rec/a.mp4").with_acceleration(false);
        let args = args_as_strings(&runner.build_args(&request));
        assert!(args.contains(&"-y".to_string()));
        assert!(!args.contains(&"-n".to_string()));
        assert!(!args.contains(&"-hwaccel".to_string()));
    }

    #[test]
    fn test_is_available_for_missing_tool() {
        let runner = FfmpegRunner::new("/definitely/not/here/ffmpeg");
        assert!(!runner.is_available());
        assert_eq!(runner.tool_path(), Path::new("/definitely/not/here/ffmpeg"));
    }

    #[tokio::test]
    async fn test_missing_tool_yields_failed_outcome() {
        let runner = FfmpegRunner::new("/definitely/not/here/ffmpeg")
            .with_fallback_duration(Duration::from_secs(1));
        let request = ConversionRequest::new("/rec/a.ts", "/rec/a.mp4");
        let outcome = runner
            .run(&request, &ProgressReporter::noop(), &CancellationToken::new())
            .await;
        assert!(!outcome.success());
        assert!(
            outcome
                .error_message
                .starts_with("failed to start conversion tool")
        );
    }

    #[tokio::test]
    async fn test_precancelled_run_does_not_spawn() {
        let runner = FfmpegRunner::new("/definitely/not/here/ffmpeg");
        let token = CancellationToken::new();
        token.cancel();
        let outcome = runner
            .run(
                &ConversionRequest::new("/rec/a.ts", "/rec/a.mp4"),
                &ProgressReporter::noop(),
                &token,
            )
            .await;
        assert_eq!(outcome, ConversionOutcome::cancelled(String::new()));
    }
}
