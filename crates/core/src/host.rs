//! Host file/memory bridge.
//!
//! Everything the core knows about the outside world comes through
//! [`HostBridge`]: file sizes, positional chunk reads, releasing the open
//! file behind a path, and memory figures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docvault_cache::{MemoryProbe, ProcessMemoryProbe, SystemMemoryInfo};

#[async_trait]
pub trait HostBridge: Send + Sync {
    async fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Read up to `len` bytes at `offset`
    ///
    /// A result shorter than `len` means the file ended early.
    async fn read_chunk(&self, path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>>;

    /// Release the open file behind `path`, returning whether one was open
    async fn close_file_handle(&self, path: &Path) -> bool;

    fn system_memory_info(&self) -> Option<SystemMemoryInfo>;
}

/// Bridge over the local filesystem
///
/// The first read of a path opens it and the handle stays cached until
/// [`close_file_handle`](HostBridge::close_file_handle). Reads run on the
/// blocking pool.
pub struct LocalFileBridge {
    handles: Mutex<HashMap<PathBuf, Arc<File>>>,
    probe: Arc<dyn MemoryProbe>,
}

impl LocalFileBridge {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(ProcessMemoryProbe))
    }

    pub fn with_probe(probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            probe,
        }
    }

    /// Number of cached open files
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }

    async fn handle_for(&self, path: &Path) -> io::Result<Arc<File>> {
        let cached = self.handles.lock().get(path).cloned();
        if let Some(file) = cached {
            return Ok(file);
        }

        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || File::open(owned))
            .await
            .map_err(io::Error::other)??;

        let mut handles = self.handles.lock();
        let file = handles
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(file));
        Ok(Arc::clone(file))
    }
}

impl Default for LocalFileBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBridge for LocalFileBridge {
    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn read_chunk(&self, path: &Path, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let file = self.handle_for(path).await?;
        tokio::task::spawn_blocking(move || read_exact_or_eof(&file, offset, len))
            .await
            .map_err(io::Error::other)?
    }

    async fn close_file_handle(&self, path: &Path) -> bool {
        let closed = self.handles.lock().remove(path).is_some();
        if closed {
            tracing::debug!(path = %path.display(), "file handle closed");
        }
        closed
    }

    fn system_memory_info(&self) -> Option<SystemMemoryInfo> {
        self.probe.memory_info()
    }
}

fn read_exact_or_eof(file: &File, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(len).map_err(|_| io::Error::other("chunk too large"))?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
