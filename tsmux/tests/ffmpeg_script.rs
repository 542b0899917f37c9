//! The ffmpeg runner against stand-in shell scripts.
#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tsmux::domain::JobStatus;
use tsmux::persistence::task_file;
use tsmux::pipeline::{RunOptions, StartOutcome};
use tsmux::runner::{
    ConversionRequest, ConversionRunner, FfmpegRunner, OutcomeStatus, ProgressReporter,
};
use tsmux::session::Session;

/// Without `-codec` the script acts as a probe and prints a 10 second
/// duration. Otherwise `$CONVERT` runs with `$last` bound to the output path.
fn fake_ffmpeg(dir: &Path, convert: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
case "$*" in
  *-codec*) ;;
  *)
    echo "Input #0, mpegts, from 'in.ts':" >&2
    echo "  Duration: 00:00:10.00, start: 1.400000, bitrate: 2500 kb/s" >&2
    exit 1
    ;;
esac
for last; do :; done
{convert}
"#
    );
    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const CONVERT_OK: &str = r#"
printf 'frame=  10 fps=0.0 time=00:00:02.50 bitrate=N/A speed=5x\r' >&2
printf 'frame=  20 fps=0.0 time=00:00:05.00 bitrate=N/A speed=5x\r' >&2
printf 'frame=  40 fps=0.0 time=00:00:10.00 bitrate=N/A speed=5x\n' >&2
printf 'mp4' > "$last"
exit 0
"#;

const CONVERT_BROKEN: &str = r#"
echo "[mpegts @ 0x1] Packet corrupt" >&2
echo "Error: invalid data found when processing input" >&2
exit 2
"#;

const CONVERT_SLOW: &str = "exec sleep 30";

/// First call leaves a partial output and hangs; later calls refuse to
/// overwrite an existing output the way `-n` does.
const CONVERT_PARTIAL_THEN_OK: &str = r#"
if [ -e "$last" ]; then
  echo "File '$last' already exists. Exiting." >&2
  exit 1
fi
if [ ! -e "$last.first" ]; then
  : > "$last.first"
  printf 'partial' > "$last"
  exec sleep 30
fi
printf 'mp4' > "$last"
exit 0
"#;

fn recorder() -> (ProgressReporter, Arc<Mutex<Vec<f64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (ProgressReporter::new(move |pct| sink.lock().push(pct)), seen)
}

fn input_in(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"ts").unwrap();
    path
}

mod runner_tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_reads_duration() {
        let dir = TempDir::new().unwrap();
        let runner = FfmpegRunner::new(fake_ffmpeg(dir.path(), CONVERT_OK));
        let input = input_in(dir.path(), "in.ts");

        let secs = runner
            .probe_duration(&input, &CancellationToken::new())
            .await;
        assert_eq!(secs, 10.0);
    }

    #[tokio::test]
    async fn test_successful_conversion_reports_progress() {
        let dir = TempDir::new().unwrap();
        let runner = FfmpegRunner::new(fake_ffmpeg(dir.path(), CONVERT_OK));
        let input = input_in(dir.path(), "in.ts");
        let request = ConversionRequest::new(&input, dir.path().join("in.mp4"));
        let (progress, seen) = recorder();

        let outcome = runner
            .run(&request, &progress, &CancellationToken::new())
            .await;

        assert!(outcome.success(), "{outcome:?}");
        assert!(request.output_path.exists());
        assert!(outcome.raw_log.contains("time=00:00:05.00"));
        assert!(
            outcome.raw_log.contains("speed=5x\rframe=  20"),
            "tool output is kept byte for byte"
        );

        let seen = seen.lock().clone();
        assert_eq!(seen.last(), Some(&100.0));
        let (last, running) = seen.split_last().unwrap();
        assert_eq!(*last, 100.0);
        assert!(running.contains(&25.0));
        assert!(running.contains(&50.0));
        assert!(running.iter().all(|pct| *pct <= 99.0));
    }

    #[tokio::test]
    async fn test_failed_conversion_carries_error_line() {
        let dir = TempDir::new().unwrap();
        let runner = FfmpegRunner::new(fake_ffmpeg(dir.path(), CONVERT_BROKEN));
        let input = input_in(dir.path(), "in.ts");
        let request = ConversionRequest::new(&input, dir.path().join("in.mp4"));

        let outcome = runner
            .run(&request, &ProgressReporter::noop(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.error_message.contains("code 2"), "{}", outcome.error_message);
        assert!(
            outcome.error_message.contains("invalid data found"),
            "{}",
            outcome.error_message
        );
        assert!(outcome.raw_log.contains("Packet corrupt"));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_conversion() {
        let dir = TempDir::new().unwrap();
        let runner = FfmpegRunner::new(fake_ffmpeg(dir.path(), CONVERT_SLOW));
        let input = input_in(dir.path(), "in.ts");
        let request = ConversionRequest::new(&input, dir.path().join("in.mp4"));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(&request, &ProgressReporter::noop(), &cancel),
        )
        .await
        .expect("cancellation should end the conversion promptly");

        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
        assert!(!request.output_path.exists());
    }
}

mod pool_tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_converts_with_script() {
        let dir = TempDir::new().unwrap();
        let tool = fake_ffmpeg(dir.path(), CONVERT_OK);
        let jobs = common::make_inputs(dir.path(), &["one.ts", "two.ts"]);
        let runner = Arc::new(FfmpegRunner::new(tool).with_overwrite(true));
        let pool = common::pool(runner, common::quiet_config());

        let outcome = pool
            .start_conversion(jobs.clone(), RunOptions::new(2))
            .await
            .unwrap();

        let StartOutcome::Finished(summary) = outcome else {
            panic!("expected the run to finish");
        };
        assert_eq!(summary.counters.completed, 2);
        for job in pool.jobs() {
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.progress_pct, 100.0);
        }
        for job in &jobs {
            assert!(!job.input_path.exists());
            assert!(job.output_path().exists());
        }
    }

    #[tokio::test]
    async fn test_pool_keeps_source_on_failure() {
        let dir = TempDir::new().unwrap();
        let tool = fake_ffmpeg(dir.path(), CONVERT_BROKEN);
        let jobs = common::make_inputs(dir.path(), &["bad.ts"]);
        let pool = common::pool(Arc::new(FfmpegRunner::new(tool)), common::quiet_config());

        pool.start_conversion(jobs.clone(), RunOptions::new(1))
            .await
            .unwrap();

        assert!(jobs[0].input_path.exists());
        let message = pool.last_error(&jobs[0].input_path).unwrap();
        assert!(message.contains("invalid data found"), "{message}");
    }

    #[tokio::test]
    async fn test_cancelled_job_resumes_cleanly() {
        let dir = TempDir::new().unwrap();
        let tool = fake_ffmpeg(dir.path(), CONVERT_PARTIAL_THEN_OK);
        let input = input_in(dir.path(), "show.ts");
        let output = dir.path().join("show.mp4");
        let task_path = dir.path().join("show.task");

        let pool = common::pool(
            Arc::new(FfmpegRunner::new(&tool)),
            common::quiet_config(),
        );
        let state = Session::scan(dir.path(), false, 1).unwrap();
        let session = Arc::new(Session::new(state, Arc::clone(&pool)));
        let run = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run(RunOptions::new(1)).await })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            while !output.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("first attempt should start writing");

        pool.stop_conversion();
        run.await.unwrap().unwrap();
        assert_eq!(pool.jobs()[0].status, JobStatus::Cancelled);
        assert!(!output.exists(), "interrupted output is discarded");
        assert!(input.exists());
        session.save(&task_path).unwrap();

        let loaded = task_file::load(&task_path).unwrap();
        let resumed_pool = common::pool(
            Arc::new(FfmpegRunner::new(&tool)),
            common::quiet_config(),
        );
        let resumed = Session::from_task(loaded, Arc::clone(&resumed_pool));
        let outcome = resumed.run(RunOptions::new(1)).await.unwrap();

        let StartOutcome::Finished(summary) = outcome else {
            panic!("expected the resumed run to finish");
        };
        assert_eq!(summary.counters.completed, 1);
        assert_eq!(summary.counters.failed, 0);
        assert_eq!(std::fs::read(&output).unwrap(), b"mp4".to_vec());
        assert!(!input.exists());
    }
}
