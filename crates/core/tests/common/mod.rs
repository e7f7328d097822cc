#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docvault_cache::{MemoryProbe, SystemMemoryInfo};
use docvault_core::{HostBridge, Vault, VaultConfig};
use docvault_pdf_engine::{
    fixtures, EngineHandle, PageSize, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
};

/// In-memory host with read accounting
///
/// Later offsets are answered sooner so parallel reads complete out of
/// order.
#[derive(Default)]
pub struct MemoryBridge {
    files: Mutex<HashMap<PathBuf, Arc<Vec<u8>>>>,
    open: Mutex<HashSet<PathBuf>>,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    fail_offset: Mutex<Option<u64>>,
    truncate_reads: Mutex<bool>,
}

impl MemoryBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.lock().insert(path.into(), Arc::new(bytes));
    }

    /// Add a blank document of `pages` pages and return its path
    pub fn add_document(&self, name: &str, pages: u32) -> PathBuf {
        let path = PathBuf::from(format!("/vault/{name}"));
        let bytes = fixtures::blank_document(pages, 144.0, 72.0).expect("fixture");
        self.add_file(path.clone(), bytes);
        path
    }

    pub fn file_len(&self, path: &Path) -> usize {
        self.files.lock().get(path).map(|b| b.len()).unwrap_or(0)
    }

    pub fn fail_reads_at(&self, offset: u64) {
        *self.fail_offset.lock() = Some(offset);
    }

    pub fn truncate_reads(&self) {
        *self.truncate_reads.lock() = true;
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.open.lock().contains(path)
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostBridge for MemoryBridge {
    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .lock()
            .get(path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    async fn read_chunk(&self, path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let bytes = self.files.lock().get(path).cloned();
        self.open.lock().insert(path.to_path_buf());

        let total = bytes.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_micros(total.saturating_sub(offset))).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if *self.fail_offset.lock() == Some(offset) {
            return Err(io::Error::other("device unplugged"));
        }
        let bytes = bytes.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        let start = offset.min(total) as usize;
        let mut end = (offset + len).min(total) as usize;
        if *self.truncate_reads.lock() && end > start {
            end -= 1;
        }
        Ok(bytes[start..end].to_vec())
    }

    async fn close_file_handle(&self, path: &Path) -> bool {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.lock().remove(path)
    }

    fn system_memory_info(&self) -> Option<SystemMemoryInfo> {
        Some(SystemMemoryInfo {
            total_bytes: 8 * 1024 * 1024 * 1024,
            free_bytes: 4 * 1024 * 1024 * 1024,
            used_bytes: 256 * 1024 * 1024,
        })
    }
}

/// Engine that fails to render one page
pub struct FailingEngine {
    inner: docvault_pdf_engine::LopdfEngine,
    fail_page_index: u32,
}

impl FailingEngine {
    pub fn failing_on_page(page_number: u32) -> Self {
        Self {
            inner: docvault_pdf_engine::LopdfEngine::new(),
            fail_page_index: page_number - 1,
        }
    }

    fn check(&self, page_index: u32) -> Result<(), PdfEngineError> {
        if page_index == self.fail_page_index {
            return Err(PdfEngineError::Render("corrupt content stream".into()));
        }
        Ok(())
    }
}

impl PdfEngine for FailingEngine {
    fn open(&mut self, bytes: Vec<u8>) -> Result<EngineHandle, PdfEngineError> {
        self.inner.open(bytes)
    }

    fn page_count(&self, handle: EngineHandle) -> Result<u32, PdfEngineError> {
        self.inner.page_count(handle)
    }

    fn page_size(&self, handle: EngineHandle, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.inner.page_size(handle, page_index)
    }

    fn render_page(
        &self,
        handle: EngineHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        self.check(request.page_index)?;
        self.inner.render_page(handle, request)
    }

    fn render_page_with_progress(
        &self,
        handle: EngineHandle,
        request: RenderRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<RgbaImage, PdfEngineError> {
        self.check(request.page_index)?;
        self.inner.render_page_with_progress(handle, request, on_progress)
    }

    fn close(&mut self, handle: EngineHandle) -> Result<(), PdfEngineError> {
        self.inner.close(handle)
    }

    fn open_documents(&self) -> usize {
        self.inner.open_documents()
    }
}

/// Probe reporting a fixed usage
pub fn fixed_probe(used_bytes: u64) -> Arc<dyn MemoryProbe> {
    Arc::new(move || {
        Some(SystemMemoryInfo {
            total_bytes: 8 * 1024 * 1024 * 1024,
            free_bytes: 1024 * 1024 * 1024,
            used_bytes,
        })
    })
}

/// Vault over `bridge` with default configuration
pub fn vault(bridge: &Arc<MemoryBridge>, engine: Box<dyn PdfEngine>) -> Vault {
    vault_with_config(bridge, engine, VaultConfig::default(), 256 * 1024 * 1024)
}

pub fn vault_with_config(
    bridge: &Arc<MemoryBridge>,
    engine: Box<dyn PdfEngine>,
    config: VaultConfig,
    used_bytes: u64,
) -> Vault {
    let host: Arc<dyn HostBridge> = bridge.clone();
    Vault::with_parts(config, host, engine, fixed_probe(used_bytes))
}
