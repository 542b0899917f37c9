//! Terminal progress for a conversion run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use tsmux::pipeline::{PipelineEvent, RunSummary};

fn job_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.yellow} {msg:30!} [{bar:30.cyan/blue}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn overall_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:30.green/white}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One bar per running job plus an overall bar, driven by pipeline events.
pub struct ProgressDisplay {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: HashMap<PathBuf, ProgressBar>,
}

impl ProgressDisplay {
    pub fn new(total: usize, hidden: bool) -> Self {
        let multi = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(overall_style());
        overall.set_prefix("converting");

        Self {
            multi,
            overall,
            bars: HashMap::new(),
        }
    }

    /// Consume events until the run completes or the channel closes.
    pub async fn run(mut self, mut events: broadcast::Receiver<PipelineEvent>) {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::PipelineCompleted { summary }) => {
                    self.finish(&summary);
                    break;
                }
                Ok(event) => self.apply(event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress display fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    fn apply(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::JobStarted { input_path } => {
                let bar = self
                    .multi
                    .insert_before(&self.overall, ProgressBar::new(100));
                bar.set_style(job_style());
                bar.set_message(file_name(&input_path));
                self.bars.insert(input_path, bar);
            }
            PipelineEvent::Progress {
                input_path,
                progress_pct,
            } => {
                if let Some(bar) = self.bars.get(&input_path) {
                    bar.set_position(progress_pct as u64);
                }
            }
            PipelineEvent::JobCompleted { input_path } => {
                self.end_job(&input_path, format!("done      {}", file_name(&input_path)));
            }
            PipelineEvent::JobFailed {
                input_path,
                message,
            } => {
                self.end_job(
                    &input_path,
                    format!("failed    {}: {message}", file_name(&input_path)),
                );
            }
            PipelineEvent::JobCancelled { input_path } => {
                self.end_job(&input_path, format!("cancelled {}", file_name(&input_path)));
            }
            PipelineEvent::CapacityChanged { capacity } => {
                self.overall.set_message(format!("(workers: {capacity})"));
            }
            PipelineEvent::PipelineCompleted { summary } => self.finish(&summary),
        }
    }

    fn end_job(&mut self, input_path: &Path, line: String) {
        if let Some(bar) = self.bars.remove(input_path) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        self.overall.inc(1);
        let _ = self.multi.println(line);
    }

    fn finish(&mut self, summary: &RunSummary) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
        let counters = summary.counters;
        self.overall.finish_with_message(format!(
            "{} completed, {} failed, {} cancelled",
            counters.completed, counters.failed, counters.cancelled
        ));
    }
}
