//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use tsmux::domain::JobRecord;
use tsmux::logging::TracingJournal;
use tsmux::monitor::{FixedSampler, ResourceSampler};
use tsmux::pipeline::{ConversionPool, PipelineEvent, PoolConfig};
use tsmux::runner::parser::failure_message;
use tsmux::runner::{ConversionOutcome, ConversionRequest, ConversionRunner, ProgressReporter};

/// What the scripted runner does for one input.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Report the given progress values, write the output and succeed.
    Succeed(Vec<f64>),
    /// Exit with `code`, printing `log` on the diagnostic stream.
    Fail { code: i32, log: String },
    /// Succeed without creating the output file.
    SucceedWithoutOutput,
    /// Block until [`ScriptedRunner::release`] or cancellation, then succeed.
    Hold,
    /// Write part of the output, then wait for cancellation.
    PartialThenHold,
    /// Write part of the output, then exit with `code`.
    PartialThenFail { code: i32 },
    /// Panic inside the runner.
    Panic,
}

/// A [`ConversionRunner`] whose behavior is chosen per input path.
pub struct ScriptedRunner {
    behaviors: Mutex<HashMap<PathBuf, Behavior>>,
    gate: Semaphore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    started: Mutex<Vec<PathBuf>>,
    requests: Mutex<Vec<ConversionRequest>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, input: &Path, behavior: Behavior) {
        self.behaviors.lock().insert(input.to_path_buf(), behavior);
    }

    /// Let `n` held conversions proceed.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<PathBuf> {
        self.started.lock().clone()
    }

    pub fn requests(&self) -> Vec<ConversionRequest> {
        self.requests.lock().clone()
    }

    fn behavior_for(&self, input: &Path) -> Behavior {
        self.behaviors
            .lock()
            .get(input)
            .cloned()
            .unwrap_or_else(|| Behavior::Succeed(vec![25.0, 50.0, 75.0]))
    }

    async fn perform(
        &self,
        request: &ConversionRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ConversionOutcome {
        match self.behavior_for(&request.input_path) {
            Behavior::Succeed(steps) => {
                for step in steps {
                    progress.report(step);
                    tokio::task::yield_now().await;
                }
                std::fs::write(&request.output_path, b"mp4").unwrap();
                progress.report(100.0);
                ConversionOutcome::succeeded("frame=1 time=00:00:01.00")
            }
            Behavior::Fail { code, log } => {
                ConversionOutcome::failed(failure_message(code, &log), log)
            }
            Behavior::SucceedWithoutOutput => ConversionOutcome::succeeded(""),
            Behavior::Hold => {
                progress.report(10.0);
                tokio::select! {
                    _ = cancel.cancelled() => ConversionOutcome::cancelled("held"),
                    permit = self.gate.acquire() => {
                        permit.unwrap().forget();
                        std::fs::write(&request.output_path, b"mp4").unwrap();
                        progress.report(100.0);
                        ConversionOutcome::succeeded("held then released")
                    }
                }
            }
            Behavior::PartialThenHold => {
                std::fs::write(&request.output_path, b"partial").unwrap();
                cancel.cancelled().await;
                ConversionOutcome::cancelled("partial")
            }
            Behavior::PartialThenFail { code } => {
                std::fs::write(&request.output_path, b"partial").unwrap();
                let log = "Error writing trailer".to_string();
                ConversionOutcome::failed(failure_message(code, &log), log)
            }
            Behavior::Panic => panic!("scripted runner panic"),
        }
    }
}

#[async_trait]
impl ConversionRunner for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn tool_path(&self) -> &Path {
        Path::new("scripted")
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ConversionOutcome {
        self.started.lock().push(request.input_path.clone());
        self.requests.lock().push(request.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        struct Leave<'a>(&'a AtomicUsize);
        impl Drop for Leave<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }
        let _leave = Leave(&self.active);

        self.perform(request, progress, cancel).await
    }
}

/// Create `names` as input files in `dir` and return pending jobs for them.
pub fn make_inputs(dir: &Path, names: &[&str]) -> Vec<JobRecord> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"ts").unwrap();
            JobRecord::pending(path)
        })
        .collect()
}

/// Pool config with the monitor switched off.
pub fn quiet_config() -> PoolConfig {
    PoolConfig {
        monitor_enabled: false,
        ..Default::default()
    }
}

/// Pool config sampling every `interval_ms`.
pub fn monitored_config(interval_ms: u64) -> PoolConfig {
    PoolConfig {
        monitor_interval: Duration::from_millis(interval_ms),
        monitor_enabled: true,
        ..Default::default()
    }
}

pub fn pool(runner: Arc<dyn ConversionRunner>, config: PoolConfig) -> Arc<ConversionPool> {
    pool_with_sampler(runner, Arc::new(FixedSampler::steady()), config)
}

pub fn pool_with_sampler(
    runner: Arc<dyn ConversionRunner>,
    sampler: Arc<dyn ResourceSampler>,
    config: PoolConfig,
) -> Arc<ConversionPool> {
    Arc::new(ConversionPool::new(
        runner,
        sampler,
        Arc::new(TracingJournal),
        config,
    ))
}

/// Drain every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until `count` events matching `pred` were received, collecting all
/// events seen on the way.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    count: usize,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    let mut matched = 0;
    tokio::time::timeout(Duration::from_secs(10), async {
        while matched < count {
            let event = rx.recv().await.expect("event channel open");
            if pred(&event) {
                matched += 1;
            }
            seen.push(event);
        }
    })
    .await
    .expect("timed out waiting for pipeline events");
    seen
}
