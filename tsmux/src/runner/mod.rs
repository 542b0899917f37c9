//! External conversion tool invocation.

mod ffmpeg;
pub mod parser;
mod progress;
mod traits;

pub use ffmpeg::{DEFAULT_FALLBACK_DURATION, FfmpegRunner};
pub use progress::ProgressReporter;
pub use traits::{
    CANCELLED_MESSAGE, ConversionOutcome, ConversionRequest, ConversionRunner, OutcomeStatus,
};
