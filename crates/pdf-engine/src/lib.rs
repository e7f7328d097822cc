//! Page rendering backend.
//!
//! The vault treats rendering as an opaque capability: open assembled bytes,
//! report page geometry, rasterize a page at a scale. [`PdfEngine`] is that
//! seam; [`LopdfEngine`] parses structure with lopdf and produces page
//! rasters of the right geometry.

use image::{ImageBuffer, Rgba};
use lopdf::Document;
use std::collections::HashMap;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Engine-side document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Page dimensions in PDF points (1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// US Letter, used when a page declares no usable MediaBox
    pub const LETTER: PageSize = PageSize {
        width_pt: 612.0,
        height_pt: 792.0,
    };

    /// Pixel dimensions at `scale` (1.0 = one pixel per point)
    pub fn pixel_dimensions(&self, scale: f32) -> (u32, u32) {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let width = (self.width_pt * scale).round().max(1.0) as u32;
        let height = (self.height_pt * scale).round().max(1.0) as u32;
        (width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    /// Zero-based page index
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbnailSize {
    pub width_px: u32,
    pub height_px: u32,
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self {
            width_px: 256,
            height_px: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
    #[error("render failed: {0}")]
    Render(String),
}

/// Rendering backend
///
/// Implementations hold a single render context and are not reentrant:
/// callers serialize access (the vault keeps the engine behind a mutex).
pub trait PdfEngine: Send {
    /// Parse `bytes` and keep them for later rendering
    fn open(&mut self, bytes: Vec<u8>) -> Result<EngineHandle, PdfEngineError>;

    fn page_count(&self, handle: EngineHandle) -> Result<u32, PdfEngineError>;

    fn page_size(&self, handle: EngineHandle, page_index: u32) -> Result<PageSize, PdfEngineError>;

    fn render_page(
        &self,
        handle: EngineHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;

    /// Render while reporting sub-page progress (0-100)
    ///
    /// Backends without incremental rendering report only completion.
    fn render_page_with_progress(
        &self,
        handle: EngineHandle,
        request: RenderRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<RgbaImage, PdfEngineError> {
        let image = self.render_page(handle, request)?;
        on_progress(100);
        Ok(image)
    }

    /// Render a page scaled down to fit within `target`
    fn render_thumbnail(
        &self,
        handle: EngineHandle,
        page_index: u32,
        target: ThumbnailSize,
    ) -> Result<RgbaImage, PdfEngineError> {
        let size = self.page_size(handle, page_index)?;
        let fit = (target.width_px.max(1) as f32 / size.width_pt)
            .min(target.height_px.max(1) as f32 / size.height_pt);
        let page = self.render_page(handle, RenderRequest { page_index, scale: fit })?;
        if page.width() <= target.width_px.max(1) && page.height() <= target.height_px.max(1) {
            return Ok(page);
        }
        // Rounding overshoot
        Ok(image::imageops::thumbnail(
            &page,
            page.width().min(target.width_px.max(1)),
            page.height().min(target.height_px.max(1)),
        ))
    }

    /// Release a document. Unknown handles are an error.
    fn close(&mut self, handle: EngineHandle) -> Result<(), PdfEngineError>;

    /// Number of documents currently open
    fn open_documents(&self) -> usize;
}

#[derive(Debug)]
struct DocumentRecord {
    /// Source bytes, owned until the document is closed
    _bytes: Vec<u8>,
    page_sizes: Vec<PageSize>,
}

/// lopdf-backed engine
///
/// Rasters are blank pages of the declared geometry with a light frame;
/// the engine does not interpret content streams.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<EngineHandle, DocumentRecord>,
}

const FRAME: Rgba<u8> = Rgba([220, 220, 220, 255]);
const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RENDER_BANDS: u32 = 4;

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        let doc = Document::load_mem(bytes)?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());
        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    let [x0, y0, x1, y1] = array.as_slice() else {
                        return None;
                    };
                    let (x0, y0) = (x0.as_float().ok()?, y0.as_float().ok()?);
                    let (x1, y1) = (x1.as_float().ok()?, y1.as_float().ok()?);
                    Some(PageSize {
                        width_pt: (x1 - x0).abs(),
                        height_pt: (y1 - y0).abs(),
                    })
                })
                .filter(|size| size.width_pt > 0.0 && size.height_pt > 0.0)
                .unwrap_or(PageSize::LETTER);
            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(PdfEngineError::NoPages);
        }
        Ok(sizes)
    }

    fn record(&self, handle: EngineHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs
            .get(&handle)
            .ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, bytes: Vec<u8>) -> Result<EngineHandle, PdfEngineError> {
        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = EngineHandle(self.next_handle);
        self.docs.insert(
            handle,
            DocumentRecord {
                _bytes: bytes,
                page_sizes,
            },
        );
        Ok(handle)
    }

    fn page_count(&self, handle: EngineHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(&self, handle: EngineHandle, page_index: u32) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        record
            .page_sizes
            .get(page_index as usize)
            .copied()
            .ok_or(PdfEngineError::PageOutOfRange {
                page: page_index,
                page_count: record.page_sizes.len() as u32,
            })
    }

    fn render_page(
        &self,
        handle: EngineHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        self.render_page_with_progress(handle, request, &mut |_| {})
    }

    fn render_page_with_progress(
        &self,
        handle: EngineHandle,
        request: RenderRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<RgbaImage, PdfEngineError> {
        let (width, height) = self
            .page_size(handle, request.page_index)?
            .pixel_dimensions(request.scale);

        let mut image = RgbaImage::from_pixel(width, height, PAPER);
        let framed = width >= 4 && height >= 4;
        let band_height = height.div_ceil(RENDER_BANDS);

        for band in 0..RENDER_BANDS {
            let top = band * band_height;
            let bottom = ((band + 1) * band_height).min(height);
            if framed {
                for y in top..bottom {
                    image.put_pixel(0, y, FRAME);
                    image.put_pixel(width - 1, y, FRAME);
                    if y == 0 || y == height - 1 {
                        for x in 0..width {
                            image.put_pixel(x, y, FRAME);
                        }
                    }
                }
            }
            on_progress(((band + 1) * 100 / RENDER_BANDS) as u8);
        }

        Ok(image)
    }

    fn close(&mut self, handle: EngineHandle) -> Result<(), PdfEngineError> {
        self.docs
            .remove(&handle)
            .map(|_| ())
            .ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn open_documents(&self) -> usize {
        self.docs.len()
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
