//! DocVault Scheduler Library
//!
//! Cooperative cancellation and bounded-window I/O for the document core.
//!
//! This crate provides the two scheduling primitives the loader and the
//! extraction pipeline share: cancellation tokens tracked per document run,
//! and a fixed-width batch window for overlapping range reads without
//! letting the number of in-flight requests grow with the file size.
//!
//! # Example
//!
//! ```
//! use docvault_scheduler::{CancellationRegistry, CancellationToken};
//!
//! let registry = CancellationRegistry::new();
//!
//! // Claim the run slot for document 7
//! let guard = registry.try_register(7, CancellationToken::new()).unwrap();
//! assert!(registry.try_register(7, CancellationToken::new()).is_none());
//!
//! // Cancel from elsewhere; the worker observes it between units of work
//! registry.cancel(7);
//! assert!(guard.token().is_cancelled());
//!
//! // Dropping the guard frees the slot
//! drop(guard);
//! assert!(!registry.is_registered(7));
//! ```

mod cancel;
mod io;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken, RunGuard, RunKey};
pub use io::{plan_ranges, BatchWindow, ByteRange};
