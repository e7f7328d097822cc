use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docvault_cache::MB;
use docvault_pdf_engine::RenderRequest;
use docvault_scheduler::{CancellationRegistry, CancellationToken};

use super::encode::encode_page;
use super::progress::{ExtractionProgress, ProgressCallback, ProgressTracker};
use crate::document::{DocumentHandle, DocumentId, DocumentRegistry};
use crate::error::{RenderFailure, Result, VaultError};
use crate::host::HostBridge;
use crate::settings::{ConversionSettings, RasterFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// One rendered and encoded page, owned by the caller
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    /// 1-based page number in the document
    pub page_number: u32,
    pub document_path: PathBuf,
    pub format: RasterFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ExtractedPage {
    /// Suggested file name, e.g. `report-page-003.png`
    pub fn file_name(&self) -> String {
        let stem = self
            .document_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        format!(
            "{stem}-page-{:03}.{}",
            self.page_number,
            self.format.extension()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub pages_extracted: u32,
    pub elapsed: Duration,
}

/// Renders pages of open documents one at a time
///
/// At most one run per document is active; a second request for the same
/// document fails instead of queueing. Cancellation is checked before each
/// page, so the page being rendered always finishes.
#[derive(Clone)]
pub struct ExtractionPipeline {
    registry: Arc<DocumentRegistry>,
    bridge: Arc<dyn HostBridge>,
    runs: CancellationRegistry,
    states: Arc<Mutex<HashMap<DocumentId, ExtractionState>>>,
}

impl ExtractionPipeline {
    pub fn new(registry: Arc<DocumentRegistry>, bridge: Arc<dyn HostBridge>) -> Self {
        Self {
            registry,
            bridge,
            runs: CancellationRegistry::new(),
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the pages selected by `settings`, handing each to `sink`
    ///
    /// Pages arrive in ascending order. On failure the pages already passed
    /// to `sink` stay valid and no later page is attempted.
    pub async fn extract<S>(
        &self,
        handle: &DocumentHandle,
        settings: &ConversionSettings,
        on_progress: Option<ProgressCallback>,
        sink: S,
    ) -> Result<ExtractionSummary>
    where
        S: FnMut(ExtractedPage),
    {
        settings.validate()?;
        let id = handle.id();
        if !self.registry.is_open(id) {
            return Err(VaultError::InvalidHandle(id));
        }
        let guard = self
            .runs
            .try_register(id.raw(), CancellationToken::new())
            .ok_or(VaultError::ExtractionInProgress(id))?;

        self.set_state(id, ExtractionState::Running);
        tracing::info!(document = %id, dpi = settings.dpi.value(), "extraction started");

        let result = self
            .run(handle, settings, on_progress, sink, guard.token())
            .await;
        drop(guard);

        let state = match &result {
            Ok(summary) => {
                tracing::info!(
                    document = %id,
                    pages = summary.pages_extracted,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "extraction completed"
                );
                ExtractionState::Completed
            }
            Err(err) if err.is_cancellation() => {
                tracing::info!(document = %id, "extraction cancelled");
                ExtractionState::Cancelled
            }
            Err(err) => {
                tracing::warn!(document = %id, error = %err, "extraction failed");
                ExtractionState::Failed
            }
        };
        self.set_state(id, state);
        result
    }

    /// Collect every extracted page
    pub async fn extract_all(
        &self,
        handle: &DocumentHandle,
        settings: &ConversionSettings,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<ExtractedPage>> {
        let mut pages = Vec::new();
        self.extract(handle, settings, on_progress, |page| pages.push(page))
            .await?;
        Ok(pages)
    }

    /// Request cancellation of the run on `id`; returns whether one was active
    pub fn cancel(&self, id: DocumentId) -> bool {
        self.runs.cancel(id.raw())
    }

    pub fn is_running(&self, id: DocumentId) -> bool {
        self.runs.is_registered(id.raw())
    }

    /// State of the most recent run on `id`
    pub fn state(&self, id: DocumentId) -> ExtractionState {
        self.states
            .lock()
            .get(&id)
            .copied()
            .unwrap_or(ExtractionState::Idle)
    }

    fn set_state(&self, id: DocumentId, state: ExtractionState) {
        self.states.lock().insert(id, state);
    }

    async fn run<S>(
        &self,
        handle: &DocumentHandle,
        settings: &ConversionSettings,
        on_progress: Option<ProgressCallback>,
        mut sink: S,
        token: &CancellationToken,
    ) -> Result<ExtractionSummary>
    where
        S: FnMut(ExtractedPage),
    {
        let started = Instant::now();
        let id = handle.id();
        let page_count = self.registry.page_count(id)?;
        let pages = settings.page_range.resolve(page_count);
        let total = pages.len() as u32;
        let mut tracker = ProgressTracker::new(total);
        let emit = |sample: &ExtractionProgress| {
            if let Some(callback) = &on_progress {
                callback(sample);
            }
        };

        if pages.is_empty() {
            emit(&tracker.empty_run());
            return Ok(ExtractionSummary {
                pages_extracted: 0,
                elapsed: started.elapsed(),
            });
        }

        let request_scale = settings.dpi.scale();
        for (index, &page_number) in pages.iter().enumerate() {
            let position = index as u32 + 1;
            if token.is_cancelled() {
                return Err(VaultError::ExtractionCancelled {
                    document: id,
                    pages_done: index as u32,
                });
            }

            let page_started = Instant::now();
            let request = RenderRequest {
                page_index: page_number - 1,
                scale: request_scale,
            };
            let rendered = self.registry.with_engine(id, |engine, engine_handle| {
                engine.render_page_with_progress(engine_handle, request, &mut |pct| {
                    if pct < 100 {
                        emit(&tracker.page_progress(position, pct));
                    }
                })
            })?;
            let page_failed = |source: RenderFailure| VaultError::PageRender {
                page: page_number,
                source,
            };
            let raster = rendered.map_err(|err| page_failed(err.into()))?;
            let encoded = encode_page(raster, settings.format, settings.color_space)
                .map_err(|err| page_failed(err.into()))?;

            sink(ExtractedPage {
                page_number,
                document_path: handle.path().to_path_buf(),
                format: settings.format,
                width: encoded.width,
                height: encoded.height,
                data: encoded.data,
            });

            let mut sample = tracker.page_done(position, page_number, page_started.elapsed());
            sample.memory_usage_mb = self
                .bridge
                .system_memory_info()
                .map(|info| info.used_bytes as f64 / MB as f64);
            tracing::debug!(
                document = %id,
                page = page_number,
                percentage = sample.percentage,
                "page extracted"
            );
            emit(&sample);

            tokio::task::yield_now().await;
        }

        Ok(ExtractionSummary {
            pages_extracted: total,
            elapsed: started.elapsed(),
        })
    }
}
