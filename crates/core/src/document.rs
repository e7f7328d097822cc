//! Open documents and the render context they share.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docvault_pdf_engine::{EngineHandle, PdfEngine, PdfEngineError};

use crate::error::{Result, VaultError};
use crate::host::HostBridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentId(u64);

impl DocumentId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// What keeps an open document's bytes alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Assembled buffer only; the file was released after loading
    InMemory,
    /// Assembled buffer plus an open file held until close
    FileReference,
}

/// Caller's ticket for an open document
///
/// Not `Clone`: one handle per open. Closing goes through the loader or the
/// vault and may happen more than once safely.
#[derive(Debug)]
pub struct DocumentHandle {
    info: DocumentInfo,
}

impl DocumentHandle {
    pub fn id(&self) -> DocumentId {
        self.info.id
    }

    pub fn page_count(&self) -> u32 {
        self.info.page_count
    }

    pub fn size_bytes(&self) -> u64 {
        self.info.size_bytes
    }

    pub fn source_kind(&self) -> SourceKind {
        self.info.source_kind
    }

    pub fn path(&self) -> &Path {
        &self.info.path
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }
}

/// Snapshot of an open document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: u32,
    pub size_bytes: u64,
    pub source_kind: SourceKind,
    pub evictable: bool,
}

struct DocumentEntry {
    engine_handle: EngineHandle,
    info: DocumentInfo,
}

/// Every open document plus the render engine
///
/// The engine is a single non-reentrant context; all access goes through
/// [`with_engine`](Self::with_engine).
pub struct DocumentRegistry {
    engine: Mutex<Box<dyn PdfEngine>>,
    entries: Mutex<HashMap<DocumentId, DocumentEntry>>,
    next_id: AtomicU64,
    bridge: Arc<dyn HostBridge>,
}

impl DocumentRegistry {
    pub fn new(engine: Box<dyn PdfEngine>, bridge: Arc<dyn HostBridge>) -> Self {
        Self {
            engine: Mutex::new(engine),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            bridge,
        }
    }

    /// Hand assembled bytes to the engine and register the result
    pub(crate) fn register(
        &self,
        path: &Path,
        bytes: Vec<u8>,
        source_kind: SourceKind,
        evictable: bool,
    ) -> std::result::Result<DocumentHandle, PdfEngineError> {
        let size_bytes = bytes.len() as u64;
        let (engine_handle, page_count) = {
            let mut engine = self.engine.lock();
            let handle = engine.open(bytes)?;
            match engine.page_count(handle) {
                Ok(count) => (handle, count),
                Err(err) => {
                    let _ = engine.close(handle);
                    return Err(err);
                }
            }
        };

        let id = DocumentId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = DocumentInfo {
            id,
            path: path.to_path_buf(),
            page_count,
            size_bytes,
            source_kind,
            evictable,
        };
        self.entries.lock().insert(
            id,
            DocumentEntry {
                engine_handle,
                info: info.clone(),
            },
        );
        Ok(DocumentHandle { info })
    }

    /// Release a document
    ///
    /// Returns `false` if it was already closed. The engine context is freed
    /// and, for file-backed documents, the host closes the file once no other
    /// open document reads from it.
    pub async fn close(&self, id: DocumentId) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            tracing::debug!(document = %id, "close on already closed document");
            return false;
        };

        if let Err(err) = self.engine.lock().close(entry.engine_handle) {
            tracing::warn!(document = %id, error = %err, "engine failed to release document");
        }
        if entry.info.source_kind == SourceKind::FileReference
            && !self.holds_file(&entry.info.path)
        {
            self.bridge.close_file_handle(&entry.info.path).await;
        }
        tracing::info!(document = %id, path = %entry.info.path.display(), "document closed");
        true
    }

    /// Run `f` against the engine with this document's engine handle
    pub fn with_engine<R>(
        &self,
        id: DocumentId,
        f: impl FnOnce(&dyn PdfEngine, EngineHandle) -> R,
    ) -> Result<R> {
        let handle = self
            .entries
            .lock()
            .get(&id)
            .map(|entry| entry.engine_handle)
            .ok_or(VaultError::InvalidHandle(id))?;
        let engine = self.engine.lock();
        Ok(f(engine.as_ref(), handle))
    }

    /// Whether an open file-backed document still reads from `path`
    pub fn holds_file(&self, path: &Path) -> bool {
        self.entries.lock().values().any(|entry| {
            entry.info.source_kind == SourceKind::FileReference && entry.info.path == path
        })
    }

    pub fn is_open(&self, id: DocumentId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn info(&self, id: DocumentId) -> Option<DocumentInfo> {
        self.entries.lock().get(&id).map(|entry| entry.info.clone())
    }

    pub fn page_count(&self, id: DocumentId) -> Result<u32> {
        self.info(id)
            .map(|info| info.page_count)
            .ok_or(VaultError::InvalidHandle(id))
    }

    pub fn open_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn evictable_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|entry| entry.info.evictable)
            .map(|entry| entry.info.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
