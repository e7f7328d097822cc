use std::path::PathBuf;
use thiserror::Error;

use docvault_pdf_engine::PdfEngineError;

use crate::config::ConfigError;
use crate::document::DocumentId;

pub type Result<T> = std::result::Result<T, VaultError>;

/// Why a single page could not be produced
#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error(transparent)]
    Engine(#[from] PdfEngineError),
    #[error("encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Errors surfaced by loading and extraction
///
/// Cancellation travels through this type too. Check
/// [`is_cancellation`](Self::is_cancellation) before showing a message.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a readable document: {source}", .path.display())]
    DocumentFormat {
        path: PathBuf,
        #[source]
        source: PdfEngineError,
    },

    #[error("opening {} ({size_bytes} bytes) was declined", .path.display())]
    LargeFileDeclined { path: PathBuf, size_bytes: u64 },

    #[error("extraction of {document} cancelled after {pages_done} pages")]
    ExtractionCancelled { document: DocumentId, pages_done: u32 },

    #[error("page {page} failed: {source}")]
    PageRender {
        page: u32,
        #[source]
        source: RenderFailure,
    },

    #[error("{0} is closed or was never opened")]
    InvalidHandle(DocumentId),

    #[error("an extraction is already running for {0}")]
    ExtractionInProgress(DocumentId),

    #[error("invalid conversion settings: {0}")]
    InvalidSettings(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Flat classification of [`VaultError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    DocumentFormat,
    LargeFileDeclined,
    ExtractionCancelled,
    PageRender,
    InvalidHandle,
    ExtractionInProgress,
    InvalidSettings,
    Config,
}

impl VaultError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VaultError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Io { .. } => ErrorKind::Io,
            VaultError::DocumentFormat { .. } => ErrorKind::DocumentFormat,
            VaultError::LargeFileDeclined { .. } => ErrorKind::LargeFileDeclined,
            VaultError::ExtractionCancelled { .. } => ErrorKind::ExtractionCancelled,
            VaultError::PageRender { .. } => ErrorKind::PageRender,
            VaultError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            VaultError::ExtractionInProgress(_) => ErrorKind::ExtractionInProgress,
            VaultError::InvalidSettings(_) => ErrorKind::InvalidSettings,
            VaultError::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the user asked for the operation to stop
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LargeFileDeclined | ErrorKind::ExtractionCancelled
        )
    }
}
