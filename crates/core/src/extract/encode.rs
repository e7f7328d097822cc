use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError};

use docvault_pdf_engine::RgbaImage;

use crate::settings::{ColorSpace, RasterFormat};

/// Encoded page raster
pub(crate) struct Encoded {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Convert a rendered page to the requested color space and format
pub(crate) fn encode_page(
    page: RgbaImage,
    format: RasterFormat,
    color_space: ColorSpace,
) -> Result<Encoded, ImageError> {
    let (width, height) = page.dimensions();
    let page = DynamicImage::ImageRgba8(page);
    let (pixels, color) = match color_space {
        ColorSpace::Rgb => (page.to_rgb8().into_raw(), ExtendedColorType::Rgb8),
        ColorSpace::Grayscale => (page.to_luma8().into_raw(), ExtendedColorType::L8),
    };
    drop(page);

    let mut data = Vec::new();
    match format {
        RasterFormat::Lossless { compression_level } => {
            PngEncoder::new_with_quality(
                &mut data,
                png_compression(compression_level),
                FilterType::Adaptive,
            )
            .write_image(&pixels, width, height, color)?;
        }
        RasterFormat::Lossy { quality } => {
            JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100))
                .write_image(&pixels, width, height, color)?;
        }
    }

    Ok(Encoded {
        data,
        width,
        height,
    })
}
