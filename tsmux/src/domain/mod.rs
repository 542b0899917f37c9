//! Entities flowing through the conversion pipeline.

mod job;
mod state;

pub use job::{JobRecord, JobStatus, OUTPUT_EXTENSION, RUNNING_PROGRESS_CEILING, output_path_for};
pub use state::PipelineState;
