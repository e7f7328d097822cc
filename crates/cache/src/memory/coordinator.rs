//! Reentrancy-guarded cleanup coordination.
//!
//! The coordinator owns the set of cleanup callbacks and the sampler that
//! decides when to run them. One coordinator is constructed by the
//! application root and handed to whatever needs to register callbacks.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

use super::probe::{release_free_memory, MemoryProbe, ProcessMemoryProbe};
use super::sampler::{MemorySample, MemorySampler, SampleCallback};
use super::MB;

/// Failure reported by a cleanup callback
///
/// These are logged by the coordinator and never returned to the caller of
/// [`CleanupCoordinator::trigger_cleanup`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CleanupCallbackError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CleanupCallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

type CleanupFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), CleanupCallbackError>> + Send + Sync>;

/// Coordinator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Ceiling above which cleanup runs
    pub limit_bytes: u64,
    /// Sampling period while monitoring
    pub sample_interval: Duration,
    /// Wait between running callbacks and measuring the result
    pub grace_period: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 2048 * MB,
            sample_interval: Duration::from_secs(5),
            grace_period: Duration::from_millis(100),
        }
    }
}

/// What a completed cleanup pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub callbacks_run: usize,
    pub callbacks_failed: usize,
    pub before: Option<MemorySample>,
    pub after: Option<MemorySample>,
}

impl CleanupReport {
    /// Bytes released according to the probe; negative if usage grew
    pub fn freed_bytes(&self) -> Option<i64> {
        let before = self.before?;
        let after = self.after?;
        Some(before.used_bytes as i64 - after.used_bytes as i64)
    }
}

/// Result of a trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// A pass ran to completion
    Completed(CleanupReport),
    /// Another pass was already running; nothing was done
    AlreadyRunning,
}

struct Inner {
    callbacks: Mutex<HashMap<u64, CleanupFn>>,
    next_id: AtomicU64,
    in_progress: AtomicBool,
    sampler: MemorySampler,
    settings: Mutex<CoordinatorConfig>,
}

/// Handle returned by registration; call [`unregister`](Self::unregister)
/// to remove the callback. Dropping it leaves the callback registered.
#[must_use = "dropping the registration keeps the callback registered forever"]
pub struct CleanupRegistration {
    inner: Weak<Inner>,
    id: u64,
}

impl CleanupRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the callback. Returns `false` if it was already gone.
    pub fn unregister(self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.callbacks.lock().remove(&self.id).is_some(),
            None => false,
        }
    }
}

struct ProgressReset<'a>(&'a AtomicBool);

impl Drop for ProgressReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs registered cleanup callbacks when memory crosses the limit
#[derive(Clone)]
pub struct CleanupCoordinator {
    inner: Arc<Inner>,
}

impl CleanupCoordinator {
    pub fn new(config: CoordinatorConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            inner: Arc::new(Inner {
                callbacks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                in_progress: AtomicBool::new(false),
                sampler: MemorySampler::new(probe),
                settings: Mutex::new(config),
            }),
        }
    }

    /// Coordinator reading this process's RSS
    pub fn with_process_probe(config: CoordinatorConfig) -> Self {
        Self::new(config, Arc::new(ProcessMemoryProbe))
    }

    /// Add a callback to every future cleanup pass
    pub fn register_cleanup_callback<F, Fut>(&self, callback: F) -> CleanupRegistration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CleanupCallbackError>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: CleanupFn = Arc::new(move || callback().boxed());
        self.inner.callbacks.lock().insert(id, callback);
        CleanupRegistration {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn callback_count(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    pub fn is_cleanup_in_progress(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Run every registered callback once
    ///
    /// Returns [`CleanupOutcome::AlreadyRunning`] without doing anything when
    /// a pass is in progress. Callback failures and panics are logged and do
    /// not stop the remaining callbacks.
    pub async fn trigger_cleanup(&self) -> CleanupOutcome {
        let inner = &self.inner;
        if inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("cleanup already in progress");
            return CleanupOutcome::AlreadyRunning;
        }
        let _reset = ProgressReset(&inner.in_progress);

        let settings = *inner.settings.lock();
        let before = inner.sampler.sample_now(settings.limit_bytes);
        let callbacks: Vec<(u64, CleanupFn)> = inner
            .callbacks
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        tracing::info!(
            callbacks = callbacks.len(),
            used_mb = before.map(|s| s.used_bytes / MB),
            "running memory cleanup"
        );

        let mut failed = 0;
        for (id, callback) in &callbacks {
            let run = AssertUnwindSafe(async { callback().await }).catch_unwind();
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    failed += 1;
                    tracing::warn!(callback = id, error = %error, "cleanup callback failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::warn!(callback = id, "cleanup callback panicked");
                }
            }
        }

        let released = release_free_memory();
        tokio::time::sleep(settings.grace_period).await;

        let report = CleanupReport {
            callbacks_run: callbacks.len(),
            callbacks_failed: failed,
            before,
            after: inner.sampler.sample_now(settings.limit_bytes),
        };
        tracing::info!(
            freed_mb = report.freed_bytes().map(|b| b / MB as i64),
            failed,
            allocator_trimmed = released,
            "memory cleanup finished"
        );
        CleanupOutcome::Completed(report)
    }

    /// User-initiated cleanup; same semantics as [`trigger_cleanup`](Self::trigger_cleanup)
    pub async fn manual_cleanup(&self) -> CleanupOutcome {
        self.trigger_cleanup().await
    }

    /// Start sampling and trigger cleanup on every breach
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_monitoring(&self) {
        let settings = *self.inner.settings.lock();
        self.start_sampler(settings.sample_interval, settings.limit_bytes);
    }

    pub fn stop_monitoring(&self) {
        self.inner.sampler.stop();
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.sampler.is_running()
    }

    /// Change the memory ceiling
    ///
    /// The sampler is restarted only when the value changes and monitoring
    /// is active. Returns whether the limit changed.
    pub fn update_limit(&self, limit_bytes: u64) -> bool {
        let interval = {
            let mut settings = self.inner.settings.lock();
            if settings.limit_bytes == limit_bytes {
                return false;
            }
            settings.limit_bytes = limit_bytes;
            settings.sample_interval
        };
        if self.inner.sampler.is_running() {
            self.inner.sampler.stop();
            self.start_sampler(interval, limit_bytes);
        }
        tracing::info!(limit_mb = limit_bytes / MB, "memory limit updated");
        true
    }

    pub fn limit_bytes(&self) -> u64 {
        self.inner.settings.lock().limit_bytes
    }

    pub fn config(&self) -> CoordinatorConfig {
        *self.inner.settings.lock()
    }

    /// Current memory figures against the configured limit
    pub fn memory_usage(&self) -> Option<MemorySample> {
        self.inner.sampler.sample_now(self.limit_bytes())
    }

    fn start_sampler(&self, interval: Duration, limit_bytes: u64) {
        let weak = Arc::downgrade(&self.inner);
        let on_sample: SampleCallback = Arc::new(move |_sample| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.in_progress.load(Ordering::Acquire) {
                return;
            }
            let coordinator = CleanupCoordinator { inner };
            tokio::spawn(async move {
                coordinator.trigger_cleanup().await;
            });
        });
        self.inner.sampler.start(interval, limit_bytes, on_sample);
    }
}
