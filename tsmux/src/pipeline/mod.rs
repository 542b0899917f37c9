//! Conversion pipeline: admission, capacity adaptation and job lifecycle.

mod capacity;
mod error_index;
pub mod events;
mod jobs;
mod worker_pool;

pub use events::{PipelineEvent, RunCounters, RunSummary};
pub use worker_pool::{
    ConversionPool, DEFAULT_EVENT_CAPACITY, DEFAULT_MONITOR_INTERVAL, PoolConfig, RunOptions,
    StartOutcome,
};
