use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "tsmux",
    author,
    version,
    about = "Remux folders of MPEG-TS recordings to MP4 with ffmpeg",
    long_about = None
)]
pub struct Args {
    /// Configuration file (defaults to <config dir>/tsmux/config.toml)
    #[arg(short, long, global = true, env = "TSMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase console verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert every .ts file at the top level of a folder
    Convert {
        /// Folder holding the recordings
        folder: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Keep a resumable task file at this path
        #[arg(long)]
        task_file: Option<PathBuf>,
    },

    /// Continue a batch from its task file
    Resume {
        /// Task file written by an earlier `convert --task-file`
        task_file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Check that the conversion tool can be found
    Check,

    /// Validate a task file and summarize its state
    Inspect {
        task_file: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Maximum number of concurrent conversions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Disable hardware-accelerated decoding
    #[arg(long)]
    pub no_hwaccel: bool,
}
