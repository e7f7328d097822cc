//! Periodic memory sampling against a configured ceiling.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::probe::MemoryProbe;
use super::MB;

/// Memory pressure level relative to the configured limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    /// Below half of the limit
    Low,
    /// 50-75% of the limit
    Moderate,
    /// 75-90% of the limit
    High,
    /// Above 90% of the limit
    Critical,
}

impl MemoryPressure {
    /// Get the pressure level from a utilization ratio (0.0 and up)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Returns true if the level calls for eviction (High or Critical)
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// One memory reading, tagged with the limit it was taken against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

impl MemorySample {
    /// Read the probe and tag the figures with `limit_bytes`
    pub fn take(probe: &dyn MemoryProbe, limit_bytes: u64) -> Option<Self> {
        let info = probe.memory_info()?;
        Some(Self {
            used_bytes: info.used_bytes,
            total_bytes: info.total_bytes,
            limit_bytes,
        })
    }

    pub fn exceeds_limit(&self) -> bool {
        self.used_bytes > self.limit_bytes
    }

    /// Used bytes as a fraction of the limit
    pub fn utilization(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }

    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / MB as f64
    }
}

/// Callback invoked with every sample that exceeds the limit
pub type SampleCallback = Arc<dyn Fn(MemorySample) + Send + Sync>;

struct ActiveSampling {
    task: JoinHandle<()>,
    interval: Duration,
    limit_bytes: u64,
}

/// Fixed-interval sampler
///
/// Each tick reads the probe and hands the sample to the callback when usage
/// is above the limit. The sampler never de-duplicates: a breach on every
/// tick produces a callback on every tick. The limit is fixed for the
/// lifetime of a sampling run; restart to change it.
///
/// `start` must be called from within a Tokio runtime.
pub struct MemorySampler {
    probe: Arc<dyn MemoryProbe>,
    active: Mutex<Option<ActiveSampling>>,
}

impl MemorySampler {
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            active: Mutex::new(None),
        }
    }

    /// Begin sampling every `interval` against `limit_bytes`
    ///
    /// The first sample is taken one interval after the call. Starting an
    /// already running sampler replaces the previous run.
    pub fn start(&self, interval: Duration, limit_bytes: u64, on_sample: SampleCallback) {
        let interval = interval.max(Duration::from_millis(1));
        let probe = Arc::clone(&self.probe);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(sample) = MemorySample::take(probe.as_ref(), limit_bytes) else {
                    continue;
                };
                if sample.exceeds_limit() {
                    tracing::debug!(
                        used_mb = sample.used_mb(),
                        limit_mb = limit_bytes / MB,
                        "memory limit exceeded"
                    );
                    on_sample(sample);
                }
            }
        });

        let previous = self.active.lock().replace(ActiveSampling {
            task,
            interval,
            limit_bytes,
        });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        tracing::debug!(?interval, limit_mb = limit_bytes / MB, "memory sampler started");
    }

    /// Stop sampling. Idempotent.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().take() {
            active.task.abort();
            tracing::debug!("memory sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Limit of the current run, if any
    pub fn limit_bytes(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|a| a.limit_bytes)
    }

    /// Interval of the current run, if any
    pub fn interval(&self) -> Option<Duration> {
        self.active.lock().as_ref().map(|a| a.interval)
    }

    /// Take a sample immediately, outside the interval
    pub fn sample_now(&self, limit_bytes: u64) -> Option<MemorySample> {
        MemorySample::take(self.probe.as_ref(), limit_bytes)
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.task.abort();
        }
    }
}
