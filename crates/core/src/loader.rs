//! Chunked document loader.
//!
//! Files are read through the host bridge as fixed-size ranges, a bounded
//! window of ranges at a time, then reassembled in offset order and handed
//! to the engine. Chunk size grows with the file so huge documents do not
//! issue thousands of tiny reads.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use docvault_cache::{SystemMemoryInfo, MB};
use docvault_scheduler::{plan_ranges, BatchWindow, ByteRange};

use crate::document::{DocumentHandle, DocumentRegistry, SourceKind};
use crate::error::{Result, VaultError};
use crate::host::HostBridge;

/// Default size at which documents keep their file handle open
pub const STREAMING_THRESHOLD: u64 = 100 * MB;

/// Share of load progress given to reading; the rest covers parsing
const READ_PROGRESS_SHARE: u64 = 90;

/// Chunk size for a file of `size_bytes`
pub fn chunk_size_for(size_bytes: u64) -> u64 {
    match size_bytes {
        s if s > 1024 * MB => 50 * MB,
        s if s > 500 * MB => 20 * MB,
        s if s >= STREAMING_THRESHOLD => 10 * MB,
        s if s >= 16 * MB => 5 * MB,
        _ => 2 * MB,
    }
}

/// Asked before loading a file above the warning threshold; `false` aborts
pub type ConfirmLargeFile = Arc<dyn Fn(u64, Option<SystemMemoryInfo>) -> bool + Send + Sync>;

/// Receives load progress percentages
pub type LoadProgress = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Clone, Default)]
pub struct OpenOptions {
    confirm_large_file: Option<ConfirmLargeFile>,
    on_progress: Option<LoadProgress>,
    evictable: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm_large_file(
        mut self,
        hook: impl Fn(u64, Option<SystemMemoryInfo>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm_large_file = Some(Arc::new(hook));
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Allow memory cleanup to close this document when it is idle
    pub fn evictable(mut self, evictable: bool) -> Self {
        self.evictable = evictable;
        self
    }

    fn report(&self, pct: u8) {
        if let Some(callback) = &self.on_progress {
            callback(pct);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub large_file_warning_bytes: u64,
    /// Files at or above this size keep their file handle until close
    pub streaming_threshold_bytes: u64,
    pub read_window: usize,
    /// Fixed chunk size instead of the size-based tiers
    pub chunk_size: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            large_file_warning_bytes: 500 * MB,
            streaming_threshold_bytes: STREAMING_THRESHOLD,
            read_window: 3,
            chunk_size: None,
        }
    }
}

pub struct DocumentLoader {
    bridge: Arc<dyn HostBridge>,
    registry: Arc<DocumentRegistry>,
    config: LoaderConfig,
}

impl DocumentLoader {
    pub fn new(
        bridge: Arc<dyn HostBridge>,
        registry: Arc<DocumentRegistry>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            bridge,
            registry,
            config,
        }
    }

    pub fn config(&self) -> LoaderConfig {
        self.config
    }

    /// Read, assemble and open the document at `path`
    pub async fn open(&self, path: &Path, options: OpenOptions) -> Result<DocumentHandle> {
        let started = Instant::now();
        let size_bytes = self
            .bridge
            .file_size(path)
            .await
            .map_err(|err| VaultError::io(path, err))?;

        if size_bytes > self.config.large_file_warning_bytes {
            if let Some(confirm) = &options.confirm_large_file {
                let memory = self.bridge.system_memory_info();
                if !confirm(size_bytes, memory) {
                    tracing::info!(path = %path.display(), size_bytes, "large file load declined");
                    return Err(VaultError::LargeFileDeclined {
                        path: path.to_path_buf(),
                        size_bytes,
                    });
                }
            }
        }

        let chunk_size = self
            .config
            .chunk_size
            .unwrap_or_else(|| chunk_size_for(size_bytes));
        let source_kind = if size_bytes >= self.config.streaming_threshold_bytes {
            SourceKind::FileReference
        } else {
            SourceKind::InMemory
        };
        tracing::debug!(
            path = %path.display(),
            size_bytes,
            chunk_size,
            window = self.config.read_window,
            ?source_kind,
            "loading document"
        );

        let bytes = match self.read_all(path, size_bytes, chunk_size, &options).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.release_file(path).await;
                return Err(VaultError::io(path, err));
            }
        };

        let handle = match self
            .registry
            .register(path, bytes, source_kind, options.evictable)
        {
            Ok(handle) => handle,
            Err(source) => {
                self.release_file(path).await;
                return Err(VaultError::DocumentFormat {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if source_kind == SourceKind::InMemory {
            self.release_file(path).await;
        }
        options.report(100);

        tracing::info!(
            document = %handle.id(),
            path = %path.display(),
            pages = handle.page_count(),
            size_mb = size_bytes / MB,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document opened"
        );
        Ok(handle)
    }

    /// Release a document; safe to call more than once
    pub async fn close(&self, handle: &DocumentHandle) -> bool {
        self.registry.close(handle.id()).await
    }

    /// Close the host file unless an open document still reads from it
    async fn release_file(&self, path: &Path) {
        if self.registry.holds_file(path) {
            tracing::debug!(path = %path.display(), "file still referenced, handle kept");
            return;
        }
        self.bridge.close_file_handle(path).await;
    }

    async fn read_all(
        &self,
        path: &Path,
        size_bytes: u64,
        chunk_size: u64,
        options: &OpenOptions,
    ) -> io::Result<Vec<u8>> {
        let ranges = plan_ranges(size_bytes, chunk_size);
        let window = BatchWindow::new(self.config.read_window);
        let bridge = &self.bridge;

        let mut chunks = window
            .run(
                &ranges,
                |range: ByteRange| async move {
                    let chunk = bridge.read_chunk(path, range.offset, range.len).await?;
                    if chunk.len() as u64 != range.len {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "short read at offset {}: expected {} bytes, got {}",
                                range.offset,
                                range.len,
                                chunk.len()
                            ),
                        ));
                    }
                    Ok(chunk)
                },
                |bytes_done| {
                    let pct = (bytes_done as u128 * READ_PROGRESS_SHARE as u128
                        / size_bytes.max(1) as u128)
                        .min(READ_PROGRESS_SHARE as u128);
                    options.report(pct as u8);
                },
            )
            .await?;

        chunks.sort_unstable_by_key(|(range, _)| range.offset);
        if chunks.len() == 1 {
            if let Some((_, only)) = chunks.pop() {
                return Ok(only);
            }
        }

        let capacity = usize::try_from(size_bytes)
            .map_err(|_| io::Error::other("file too large for this platform"))?;
        let mut assembled = Vec::with_capacity(capacity);
        for (_, chunk) in chunks {
            assembled.extend_from_slice(&chunk);
        }
        Ok(assembled)
    }
}
