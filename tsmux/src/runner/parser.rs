//! FFmpeg diagnostic-stream parsing.
//!
//! Everything here works on the text ffmpeg writes to stderr: the
//! `Duration:` banner of the input, the `time=` field of its status line and
//! the error lines it prints before exiting.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::RUNNING_PROGRESS_CEILING;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid duration regex")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid time regex")
});

static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error.*").expect("valid error regex"));

fn captures_to_secs(caps: &regex::Captures<'_>) -> Option<f64> {
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let hundredths = field(4)?;
    Some(
        f64::from(hours) * 3600.0
            + f64::from(minutes) * 60.0
            + f64::from(seconds)
            + f64::from(hundredths) / 100.0,
    )
}

/// Total media duration in seconds from a probe's diagnostic output.
pub fn parse_duration(output: &str) -> Option<f64> {
    DURATION_RE
        .captures(output)
        .and_then(|caps| captures_to_secs(&caps))
        .filter(|secs| *secs > 0.0)
}

/// Position in seconds from a status line (`... time=00:01:30.50 ...`).
pub fn parse_time_field(line: &str) -> Option<f64> {
    TIME_RE
        .captures(line)
        .and_then(|caps| captures_to_secs(&caps))
}

/// Map a position onto a running-progress percentage.
///
/// Capped below 100: only a confirmed successful exit completes a job.
pub fn progress_percent(current_secs: f64, total_secs: f64) -> f64 {
    if total_secs <= 0.0 || !current_secs.is_finite() {
        return 0.0;
    }
    (current_secs / total_secs * 100.0).clamp(0.0, RUNNING_PROGRESS_CEILING)
}

/// The first diagnostic line mentioning an error, starting at the token.
///
/// Status-line redraws (`\r`) count as line breaks.
pub fn extract_error_line(output: &str) -> Option<&str> {
    output
        .split(['\r', '\n'])
        .find_map(|line| ERROR_RE.find(line))
        .map(|m| m.as_str().trim_end())
}

/// Human-readable failure message for a non-zero exit.
pub fn failure_message(exit_code: i32, output: &str) -> String {
    let mut message = format!("conversion tool exited with code {exit_code}");
    if let Some(line) = extract_error_line(output) {
        message.push_str(": ");
        message.push_str(line);
    }
    message
}
