//! Composition root.
//!
//! A [`Vault`] owns one of each subsystem: host bridge, document registry,
//! loader, extraction pipeline, cleanup coordinator and thumbnail cache.
//! Build one per process and pass references around.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use docvault_cache::{
    CacheStats, CleanupCallbackError, CleanupCoordinator, CleanupOutcome, CleanupRegistration,
    MemoryProbe, MemorySample, ProcessMemoryProbe, SharedLruCache, MB,
};
use docvault_pdf_engine::{default_engine, PdfEngine, RgbaImage, ThumbnailSize};

use crate::config::VaultConfig;
use crate::document::{DocumentHandle, DocumentId, DocumentInfo, DocumentRegistry};
use crate::error::{RenderFailure, Result, VaultError};
use crate::extract::{
    ExtractedPage, ExtractionPipeline, ExtractionState, ExtractionSummary, ProgressCallback,
};
use crate::host::{HostBridge, LocalFileBridge};
use crate::loader::{DocumentLoader, LoaderConfig, OpenOptions};
use crate::settings::ConversionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbnailKey {
    pub document: DocumentId,
    /// 1-based page number
    pub page: u32,
    pub size: ThumbnailSize,
}

pub type ThumbnailCache = SharedLruCache<ThumbnailKey, Arc<RgbaImage>>;

pub struct Vault {
    config: VaultConfig,
    registry: Arc<DocumentRegistry>,
    loader: DocumentLoader,
    pipeline: ExtractionPipeline,
    coordinator: CleanupCoordinator,
    thumbnails: ThumbnailCache,
    _builtin_cleanup: CleanupRegistration,
}

impl Vault {
    /// Vault over the local filesystem with the default engine
    pub fn new(config: VaultConfig) -> Self {
        let probe: Arc<dyn MemoryProbe> = Arc::new(ProcessMemoryProbe);
        Self::with_parts(
            config,
            Arc::new(LocalFileBridge::with_probe(Arc::clone(&probe))),
            Box::new(default_engine()),
            probe,
        )
    }

    pub fn with_parts(
        config: VaultConfig,
        bridge: Arc<dyn HostBridge>,
        engine: Box<dyn PdfEngine>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let registry = Arc::new(DocumentRegistry::new(engine, Arc::clone(&bridge)));
        let loader = DocumentLoader::new(
            Arc::clone(&bridge),
            Arc::clone(&registry),
            LoaderConfig {
                large_file_warning_bytes: config.large_file_warning_bytes(),
                read_window: config.effective_read_window(),
                ..LoaderConfig::default()
            },
        );
        let pipeline = ExtractionPipeline::new(Arc::clone(&registry), bridge);
        let coordinator = CleanupCoordinator::new(config.coordinator_config(), probe);
        let thumbnails = SharedLruCache::new(config.thumbnail_cache_capacity);

        let builtin_cleanup = {
            let registry = Arc::clone(&registry);
            let pipeline = pipeline.clone();
            let thumbnails = thumbnails.clone();
            coordinator.register_cleanup_callback(move || {
                let registry = Arc::clone(&registry);
                let pipeline = pipeline.clone();
                let thumbnails = thumbnails.clone();
                async move {
                    release_idle_documents(&registry, &pipeline, &thumbnails).await;
                    Ok::<(), CleanupCallbackError>(())
                }
            })
        };

        Self {
            config,
            registry,
            loader,
            pipeline,
            coordinator,
            thumbnails,
            _builtin_cleanup: builtin_cleanup,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub async fn open(&self, path: &Path, options: OpenOptions) -> Result<DocumentHandle> {
        self.loader.open(path, options).await
    }

    /// Close a document and drop its thumbnails; returns `false` if it was
    /// already closed
    pub async fn close(&self, handle: &DocumentHandle) -> bool {
        let id = handle.id();
        let closed = self.loader.close(handle).await;
        let purged = self.thumbnails.delete_if(|key, _| key.document == id);
        if purged > 0 {
            tracing::debug!(document = %id, thumbnails_purged = purged, "thumbnails dropped");
        }
        closed
    }

    pub fn document_info(&self, id: DocumentId) -> Option<DocumentInfo> {
        self.registry.info(id)
    }

    pub fn open_documents(&self) -> Vec<DocumentId> {
        self.registry.open_ids()
    }

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
        self.pipeline
            .extract(handle, settings, on_progress, sink)
            .await
    }

    pub async fn extract_all(
        &self,
        handle: &DocumentHandle,
        settings: &ConversionSettings,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<ExtractedPage>> {
        self.pipeline.extract_all(handle, settings, on_progress).await
    }

    pub fn cancel_extraction(&self, id: DocumentId) -> bool {
        self.pipeline.cancel(id)
    }

    pub fn extraction_state(&self, id: DocumentId) -> ExtractionState {
        self.pipeline.state(id)
    }

    /// Shared handle to the pipeline, e.g. for cancelling from a callback
    pub fn pipeline(&self) -> &ExtractionPipeline {
        &self.pipeline
    }

    /// Thumbnail of a 1-based page, served from the cache when present
    pub fn thumbnail(
        &self,
        handle: &DocumentHandle,
        page: u32,
        size: ThumbnailSize,
    ) -> Result<Arc<RgbaImage>> {
        let page_count = self.registry.page_count(handle.id())?;
        if page == 0 || page > page_count {
            return Err(VaultError::InvalidSettings(format!(
                "page {page} outside 1..={page_count}"
            )));
        }

        let key = ThumbnailKey {
            document: handle.id(),
            page,
            size,
        };
        if let Some(image) = self.thumbnails.get(&key) {
            return Ok(image);
        }
        let image = self
            .registry
            .with_engine(handle.id(), |engine, engine_handle| {
                engine.render_thumbnail(engine_handle, page - 1, size)
            })?
            .map_err(|err| VaultError::PageRender {
                page,
                source: RenderFailure::Engine(err),
            })?;

        let image = Arc::new(image);
        self.thumbnails.set(key, Arc::clone(&image));
        Ok(image)
    }

    pub fn thumbnail_stats(&self) -> CacheStats {
        self.thumbnails.stats()
    }

    pub fn thumbnail_cache(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    pub fn coordinator(&self) -> &CleanupCoordinator {
        &self.coordinator
    }

    pub fn register_cleanup_callback<F, Fut>(&self, callback: F) -> CleanupRegistration
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<(), CleanupCallbackError>>
            + Send
            + 'static,
    {
        self.coordinator.register_cleanup_callback(callback)
    }

    pub async fn manual_cleanup(&self) -> CleanupOutcome {
        self.coordinator.manual_cleanup().await
    }

    pub fn memory_usage(&self) -> Option<MemorySample> {
        self.coordinator.memory_usage()
    }

    /// Start memory monitoring; requires a Tokio runtime
    pub fn start_monitoring(&self) {
        self.coordinator.start_monitoring();
    }

    pub fn stop_monitoring(&self) {
        self.coordinator.stop_monitoring();
    }

    pub fn update_ram_limit_mb(&self, mb: u64) -> bool {
        self.coordinator.update_limit(mb * MB)
    }
}

/// Built-in cleanup pass
///
/// Closes evictable documents that are not being extracted, drops thumbnails
/// of documents that are no longer open, then halves what is left.
async fn release_idle_documents(
    registry: &DocumentRegistry,
    pipeline: &ExtractionPipeline,
    thumbnails: &ThumbnailCache,
) {
    let mut closed = 0;
    for id in registry.evictable_ids() {
        if pipeline.is_running(id) {
            continue;
        }
        if registry.close(id).await {
            closed += 1;
        }
    }

    let open: HashSet<DocumentId> = registry.open_ids().into_iter().collect();
    let purged = thumbnails.delete_if(|key, _| !open.contains(&key.document));
    let trimmed = thumbnails.trim_oldest(thumbnails.len() / 2);

    tracing::info!(
        documents_closed = closed,
        thumbnails_purged = purged,
        thumbnails_trimmed = trimmed,
        "released idle vault memory"
    );
}
