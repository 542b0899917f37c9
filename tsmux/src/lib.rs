//! tsmux library crate.
//!
//! Batch remuxing of MPEG-TS recordings to MP4 through ffmpeg, with a worker
//! capacity that follows host CPU and disk pressure and task files that let
//! an interrupted batch resume.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod persistence;
pub mod pipeline;
pub mod runner;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
