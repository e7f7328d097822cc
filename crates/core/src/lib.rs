//! DocVault Core Library
//!
//! Loads large documents under bounded memory and extracts their pages as
//! images. The pieces:
//!
//! - [`host`]: the file/memory bridge everything reads through
//! - [`loader`]: chunked, size-adaptive document loading
//! - [`document`]: open documents and the shared render context
//! - [`extract`]: page-by-page rasterization with progress and cancellation
//! - [`config`] and [`settings`]: what the caller can tune
//! - [`vault`]: the composition root tying them to the memory coordinator

pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod host;
pub mod loader;
pub mod settings;
pub mod vault;

pub use config::{ConfigError, VaultConfig};
pub use document::{DocumentHandle, DocumentId, DocumentInfo, DocumentRegistry, SourceKind};
pub use error::{ErrorKind, RenderFailure, Result, VaultError};
pub use extract::{
    ExtractedPage, ExtractionPipeline, ExtractionProgress, ExtractionState, ExtractionSummary,
    ProgressCallback,
};
pub use host::{HostBridge, LocalFileBridge};
pub use loader::{
    chunk_size_for, ConfirmLargeFile, DocumentLoader, LoadProgress, LoaderConfig, OpenOptions,
    STREAMING_THRESHOLD,
};
pub use settings::{
    ColorSpace, ConversionSettings, Dpi, PageRange, PerformanceMode, QualityPreset, RasterFormat,
};
pub use vault::{ThumbnailCache, ThumbnailKey, Vault};
