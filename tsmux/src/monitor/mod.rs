//! Host resource sampling for capacity adaptation.

mod sampler;
mod system;

pub use sampler::{
    DEFAULT_HIGH_WATER_PCT, DEFAULT_LOW_WATER_PCT, FixedSampler, ResourceSample, ResourceSampler,
    Watermarks,
};
pub use system::{DEFAULT_DISK_CEILING_MB_S, SystemSampler};
