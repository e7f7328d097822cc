//! Conversion settings for page extraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VaultError};

/// Supported output resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Dpi {
    D72,
    D150,
    D300,
    D600,
}

impl Dpi {
    pub fn value(self) -> u32 {
        match self {
            Dpi::D72 => 72,
            Dpi::D150 => 150,
            Dpi::D300 => 300,
            Dpi::D600 => 600,
        }
    }

    /// Render scale relative to native (72 dpi)
    pub fn scale(self) -> f32 {
        self.value() as f32 / 72.0
    }
}

impl TryFrom<u32> for Dpi {
    type Error = VaultError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            72 => Ok(Dpi::D72),
            150 => Ok(Dpi::D150),
            300 => Ok(Dpi::D300),
            600 => Ok(Dpi::D600),
            other => Err(VaultError::InvalidSettings(format!(
                "dpi must be one of 72, 150, 300, 600 (got {other})"
            ))),
        }
    }
}

impl From<Dpi> for u32 {
    fn from(dpi: Dpi) -> Self {
        dpi.value()
    }
}

/// Output encoding
///
/// The format carries only the knob that applies to it: lossy output has a
/// quality, lossless output has a compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RasterFormat {
    /// PNG, `compression_level` in 0..=9
    Lossless { compression_level: u8 },
    /// JPEG, `quality` in 1..=100
    Lossy { quality: u8 },
}

impl RasterFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Lossless { .. } => "png",
            RasterFormat::Lossy { .. } => "jpg",
        }
    }
}

impl Default for RasterFormat {
    fn default() -> Self {
        RasterFormat::Lossless {
            compression_level: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    #[default]
    Rgb,
    Grayscale,
}

/// Which pages to extract (1-based)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRange {
    #[default]
    All,
    Span { start: u32, end: u32 },
    List(Vec<u32>),
}

impl PageRange {
    /// Effective page numbers for a document of `page_count` pages
    ///
    /// Spans are clipped to the document; lists are sorted, de-duplicated,
    /// and lose pages that do not exist.
    pub fn resolve(&self, page_count: u32) -> Vec<u32> {
        match self {
            PageRange::All => (1..=page_count).collect(),
            PageRange::Span { start, end } => {
                let start = (*start).max(1);
                let end = (*end).min(page_count);
                (start..=end).collect()
            }
            PageRange::List(pages) => {
                let mut pages = pages.clone();
                pages.sort_unstable();
                pages.dedup();
                let before = pages.len();
                pages.retain(|page| (1..=page_count).contains(page));
                if pages.len() != before {
                    tracing::warn!(
                        dropped = before - pages.len(),
                        page_count,
                        "ignoring pages outside the document"
                    );
                }
                pages
            }
        }
    }
}

impl FromStr for PageRange {
    type Err = VaultError;

    /// Parses `all`, `3`, `2-5` or `1,4,7`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || VaultError::InvalidSettings(format!("invalid page range '{s}'"));
        let page = |part: &str| -> Result<u32> {
            match part.trim().parse::<u32>() {
                Ok(0) | Err(_) => Err(invalid()),
                Ok(n) => Ok(n),
            }
        };

        if s.eq_ignore_ascii_case("all") {
            return Ok(PageRange::All);
        }
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(invalid());
            }
            return Ok(PageRange::Span { start, end });
        }
        let pages = s.split(',').map(page).collect::<Result<Vec<_>>>()?;
        Ok(PageRange::List(pages))
    }
}

/// Named bundles of conversion settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Draft,
    #[default]
    Standard,
    High,
    Archival,
}

impl QualityPreset {
    pub fn settings(self) -> ConversionSettings {
        let (dpi, format) = match self {
            QualityPreset::Draft => (Dpi::D72, RasterFormat::Lossy { quality: 60 }),
            QualityPreset::Standard => (
                Dpi::D150,
                RasterFormat::Lossless {
                    compression_level: 6,
                },
            ),
            QualityPreset::High => (
                Dpi::D300,
                RasterFormat::Lossless {
                    compression_level: 6,
                },
            ),
            QualityPreset::Archival => (
                Dpi::D600,
                RasterFormat::Lossless {
                    compression_level: 9,
                },
            ),
        };
        ConversionSettings {
            dpi,
            format,
            ..ConversionSettings::default()
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityPreset::Draft => "draft",
            QualityPreset::Standard => "standard",
            QualityPreset::High => "high",
            QualityPreset::Archival => "archival",
        }
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(QualityPreset::Draft),
            "standard" => Ok(QualityPreset::Standard),
            "high" => Ok(QualityPreset::High),
            "archival" => Ok(QualityPreset::Archival),
            other => Err(format!("unknown quality preset '{other}'")),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade-off between memory use and load speed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    #[default]
    Balanced,
    LowMemory,
    Throughput,
}

impl PerformanceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceMode::Balanced => "balanced",
            PerformanceMode::LowMemory => "low_memory",
            PerformanceMode::Throughput => "throughput",
        }
    }
}

impl FromStr for PerformanceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "balanced" => Ok(PerformanceMode::Balanced),
            "low_memory" => Ok(PerformanceMode::LowMemory),
            "throughput" => Ok(PerformanceMode::Throughput),
            other => Err(format!("unknown performance mode '{other}'")),
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSettings {
    pub dpi: Dpi,
    pub format: RasterFormat,
    pub color_space: ColorSpace,
    pub page_range: PageRange,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            dpi: Dpi::D150,
            format: RasterFormat::default(),
            color_space: ColorSpace::Rgb,
            page_range: PageRange::All,
        }
    }
}

impl ConversionSettings {
    pub fn with_pages(mut self, page_range: PageRange) -> Self {
        self.page_range = page_range;
        self
    }

    pub fn with_dpi(mut self, dpi: Dpi) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_format(mut self, format: RasterFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.format {
            RasterFormat::Lossy { quality } if !(1..=100).contains(&quality) => {
                Err(VaultError::InvalidSettings(format!(
                    "quality must be within 1..=100 (got {quality})"
                )))
            }
            RasterFormat::Lossless { compression_level } if compression_level > 9 => {
                Err(VaultError::InvalidSettings(format!(
                    "compression level must be within 0..=9 (got {compression_level})"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dpi_conversion() {
        assert_eq!(Dpi::try_from(300).unwrap(), Dpi::D300);
        assert!(Dpi::try_from(96).is_err());
        assert_eq!(Dpi::D72.scale(), 1.0);
        assert_eq!(Dpi::D600.scale(), 600.0 / 72.0);
    }

    #[test]
    fn test_resolve_all_and_span() {
        assert_eq!(PageRange::All.resolve(3), vec![1, 2, 3]);
        assert_eq!(PageRange::Span { start: 2, end: 9 }.resolve(4), vec![2, 3, 4]);
        assert!(PageRange::Span { start: 6, end: 9 }.resolve(4).is_empty());
        assert!(PageRange::All.resolve(0).is_empty());
    }

    #[test]
    fn test_resolve_list_sorted_and_deduplicated() {
        let range = PageRange::List(vec![5, 2, 3, 2, 9]);
        assert_eq!(range.resolve(5), vec![2, 3, 5]);
    }

    #[test]
    fn test_parse_page_range() {
        assert_eq!("all".parse::<PageRange>().unwrap(), PageRange::All);
        assert_eq!(
            "1-3".parse::<PageRange>().unwrap(),
            PageRange::Span { start: 1, end: 3 }
        );
        assert_eq!(
            "2, 5".parse::<PageRange>().unwrap(),
            PageRange::List(vec![2, 5])
        );
        assert_eq!("4".parse::<PageRange>().unwrap(), PageRange::List(vec![4]));

        for bad in ["", "0", "3-1", "a,b", "1-"] {
            assert!(bad.parse::<PageRange>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_validate_ranges() {
        let lossy =
            |quality| ConversionSettings::default().with_format(RasterFormat::Lossy { quality });
        assert!(lossy(1).validate().is_ok());
        assert!(lossy(100).validate().is_ok());
        assert!(lossy(0).validate().is_err());
        assert!(lossy(101).validate().is_err());

        let lossless = |compression_level| {
            ConversionSettings::default().with_format(RasterFormat::Lossless { compression_level })
        };
        assert!(lossless(9).validate().is_ok());
        assert!(lossless(10).validate().is_err());
    }

    #[test]
    fn test_presets() {
        let draft = QualityPreset::Draft.settings();
        assert_eq!(draft.dpi, Dpi::D72);
        assert_eq!(draft.format, RasterFormat::Lossy { quality: 60 });

        let archival = QualityPreset::Archival.settings();
        assert_eq!(archival.dpi, Dpi::D600);
        assert_eq!(
            archival.format,
            RasterFormat::Lossless { compression_level: 9 }
        );
        assert_eq!("HIGH".parse::<QualityPreset>().unwrap(), QualityPreset::High);
        assert_eq!(
            "low-memory".parse::<PerformanceMode>().unwrap(),
            PerformanceMode::LowMemory
        );
    }
}
