//! DocVault Cache Library
//!
//! Bounded LRU storage plus the memory-pressure machinery that keeps the
//! working set under a configured ceiling: a periodic memory sampler and a
//! reentrancy-safe cleanup coordinator.

pub mod lru;
pub mod memory;

pub use lru::{CacheStats, LruCache, SharedLruCache};
pub use memory::{
    CleanupCallbackError, CleanupCoordinator, CleanupOutcome, CleanupRegistration, CleanupReport,
    CoordinatorConfig, MemoryPressure, MemoryProbe, MemorySample, MemorySampler,
    ProcessMemoryProbe, SampleCallback, SystemMemoryInfo, MB,
};
