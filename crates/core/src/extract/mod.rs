//! Page extraction pipeline.

mod encode;
mod pipeline;
mod progress;

pub use pipeline::{ExtractedPage, ExtractionPipeline, ExtractionState, ExtractionSummary};
pub use progress::{ExtractionProgress, ProgressCallback};
