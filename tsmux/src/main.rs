mod cli;
mod display;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::cli::{Args, Commands, RunArgs};
use crate::display::ProgressDisplay;
use tsmux::config::AppConfig;
use tsmux::domain::{JobStatus, PipelineState};
use tsmux::logging::{self, FileJournal, LOG_RETENTION_DAYS, Verbosity};
use tsmux::monitor::SystemSampler;
use tsmux::persistence::task_file;
use tsmux::pipeline::{ConversionPool, RunOptions, StartOutcome};
use tsmux::runner::{ConversionRunner, FfmpegRunner};
use tsmux::session::Session;

/// Exit code when the run was interrupted.
const EXIT_INTERRUPTED: u8 = 130;
/// Exit code when at least one job failed.
const EXIT_JOB_FAILURES: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let verbosity = Verbosity::from_flags(args.quiet, args.verbose);
    let _guard = logging::init_logging(&config.log_dir, verbosity)
        .context("Failed to initialize logging")?;

    if let Err(e) = logging::cleanup_old_logs(&config.log_dir, LOG_RETENTION_DAYS).await {
        warn!(error = %e, "Failed to cleanup old logs");
    }

    let quiet = verbosity == Verbosity::Quiet;
    match args.command {
        Commands::Check => Ok(check(&config)),
        Commands::Inspect { task_file } => inspect(&task_file),
        Commands::Convert {
            folder,
            run,
            task_file,
        } => {
            let options = run_options(&config, &run, None);
            let state = Session::scan(&folder, options.use_acceleration, options.max_workers)
                .with_context(|| format!("Failed to scan {}", folder.display()))?;
            let session = build_session(&config, state);
            execute(session, options, task_file, quiet).await
        }
        Commands::Resume { task_file, run } => {
            let loaded = task_file::load(&task_file)
                .with_context(|| format!("Failed to load task file {}", task_file.display()))?;
            if !loaded.pruned.is_empty() {
                info!(
                    pruned = loaded.pruned.len(),
                    "Skipping jobs whose input no longer exists"
                );
            }
            let options = run_options(&config, &run, Some(&loaded.state));
            let pool = build_pool(&config, &loaded.state.folder_path);
            let session = Arc::new(Session::from_task(loaded, pool));
            execute(session, options, Some(task_file), quiet).await
        }
    }
}

/// Resolve run options: CLI flags, then the task's saved settings, then the
/// configuration.
fn run_options(config: &AppConfig, run: &RunArgs, saved: Option<&PipelineState>) -> RunOptions {
    let mut options = match saved {
        Some(state) => RunOptions::new(state.worker_cap.max(1))
            .with_acceleration(state.use_acceleration),
        None => config.run_options(),
    };
    if let Some(workers) = run.workers {
        options.max_workers = workers.max(1);
    }
    if run.no_hwaccel {
        options.use_acceleration = false;
    }
    options
}

fn build_pool(config: &AppConfig, folder: &Path) -> Arc<ConversionPool> {
    let runner =
        FfmpegRunner::new(&config.ffmpeg_path).with_overwrite(config.overwrite_existing);
    let sampler = SystemSampler::new(folder)
        .with_watermarks(config.monitor.watermarks())
        .with_disk_ceiling_mb_s(config.monitor.disk_throughput_mb_s);
    let journal = FileJournal::new(&config.log_dir);
    Arc::new(ConversionPool::new(
        Arc::new(runner),
        Arc::new(sampler),
        Arc::new(journal),
        config.pool_config(),
    ))
}

fn build_session(config: &AppConfig, state: PipelineState) -> Arc<Session> {
    let pool = build_pool(config, &state.folder_path);
    Arc::new(Session::new(state, pool))
}

/// Save the task file, logging instead of failing.
async fn save_quietly(session: &Arc<Session>, task_file: Option<&Path>) {
    let Some(path) = task_file else {
        return;
    };
    if let Err(e) = session.save_async(path).await {
        warn!(path = %path.display(), error = %e, "Failed to save task file");
    }
}

async fn execute(
    session: Arc<Session>,
    options: RunOptions,
    task_file: Option<PathBuf>,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let task_file = task_file.as_deref();
    if let Some(path) = task_file {
        session
            .save(path)
            .with_context(|| format!("Failed to save task file {}", path.display()))?;
    }

    let remaining = session.snapshot().remaining();
    if remaining == 0 {
        info!("Nothing to convert");
        return Ok(ExitCode::SUCCESS);
    }

    let display = ProgressDisplay::new(remaining, quiet);
    let display_task = tokio::spawn(display.run(session.pool().subscribe()));
    let mut events = session.pool().subscribe();
    let mut listen_events = true;
    let mut listen_interrupt = true;

    let run = session.run(options);
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            signal = tokio::signal::ctrl_c(), if listen_interrupt => {
                listen_interrupt = false;
                match signal {
                    Ok(()) => {
                        warn!("Interrupt received, stopping conversions");
                        session.pool().stop_conversion();
                    }
                    Err(e) => warn!(error = %e, "Cannot listen for interrupts"),
                }
            }
            event = events.recv(), if listen_events => match event {
                Ok(event) if event.is_job_outcome() => save_quietly(&session, task_file).await,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => listen_events = false,
            },
        }
    };

    save_quietly(&session, task_file).await;

    let summary = match outcome {
        Ok(StartOutcome::Finished(summary)) => {
            if let Err(e) = display_task.await {
                warn!(error = %e, "Progress display ended abnormally");
            }
            summary
        }
        Ok(StartOutcome::AlreadyRunning) => {
            display_task.abort();
            bail!("A conversion run is already active");
        }
        Err(e) => {
            display_task.abort();
            return Err(e).context("Conversion run failed to start");
        }
    };

    for job in session
        .snapshot()
        .jobs
        .iter()
        .filter(|job| job.status == JobStatus::Failed)
    {
        if let Some(message) = session.pool().last_error(&job.input_path) {
            warn!(input = %job.input_path.display(), %message, "Conversion failed");
        }
    }

    if summary.stopped {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else if summary.counters.failed > 0 {
        Ok(ExitCode::from(EXIT_JOB_FAILURES))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn check(config: &AppConfig) -> ExitCode {
    let runner = FfmpegRunner::new(&config.ffmpeg_path);
    match process_utils::locate_executable(runner.tool_path()) {
        Some(path) if runner.is_available() => {
            println!("{} found at {}", runner.name(), path.display());
            ExitCode::SUCCESS
        }
        _ => {
            println!(
                "{} not found (configured as {}); set ffmpeg_path or {}",
                runner.name(),
                config.ffmpeg_path.display(),
                tsmux::config::FFMPEG_PATH_ENV
            );
            ExitCode::FAILURE
        }
    }
}

fn inspect(path: &Path) -> anyhow::Result<ExitCode> {
    if !task_file::is_valid(path) {
        println!("{} is not a valid task file", path.display());
        return Ok(ExitCode::FAILURE);
    }

    let loaded = task_file::load(path)
        .with_context(|| format!("Failed to load task file {}", path.display()))?;
    let state = &loaded.state;

    println!("Task file:     {}", path.display());
    println!("Folder:        {}", state.folder_path.display());
    println!("Created:       {}", state.created_at.to_rfc3339());
    println!("Last modified: {}", state.last_modified_at.to_rfc3339());
    println!("Workers:       {}", state.worker_cap);
    println!("Acceleration:  {}", state.use_acceleration);
    println!(
        "Recorded:      {} total, {} completed, {} failed",
        state.total_count, state.completed_count, state.failed_count
    );
    for status in [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        println!("  {:<10} {}", status.to_string(), state.count_status(status));
    }
    if !loaded.pruned.is_empty() {
        println!("Missing inputs: {}", loaded.pruned.len());
    }
    if loaded.counts_diverged() {
        println!(
            "Note: {} of {} recorded jobs remain",
            state.jobs.len(),
            state.total_count
        );
    }
    Ok(ExitCode::SUCCESS)
}
