//! Crash-resumable persistence of pipeline state.

pub mod task_file;

pub use task_file::LoadedTask;
