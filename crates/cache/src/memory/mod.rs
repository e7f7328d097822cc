//! Memory sampling and pressure-driven cleanup
//!
//! [`MemorySampler`] observes process memory on a fixed interval and reports
//! samples above the configured limit. [`CleanupCoordinator`] owns the
//! sampler, a registry of cleanup callbacks, and the guard that keeps at most
//! one cleanup pass running no matter how many breaches are reported.

mod coordinator;
mod probe;
mod sampler;

pub use coordinator::{
    CleanupCallbackError, CleanupCoordinator, CleanupOutcome, CleanupRegistration, CleanupReport,
    CoordinatorConfig,
};
pub use probe::{
    current_rss_bytes, physical_ram_bytes, release_free_memory, MemoryProbe, ProcessMemoryProbe,
    SystemMemoryInfo,
};
pub use sampler::{MemoryPressure, MemorySample, MemorySampler, SampleCallback};

/// Bytes per megabyte
pub const MB: u64 = 1024 * 1024;
