use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Progress of one extraction run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionProgress {
    /// 1-based position of the page being worked on within the run
    pub current_page: u32,
    pub total_pages: u32,
    /// Overall completion, never decreasing within a run
    pub percentage: u8,
    /// Render progress of the current page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page_progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(&ExtractionProgress) + Send + Sync>;

/// Page durations averaged for the time estimate
const ETA_WINDOW: usize = 5;

/// Builds progress samples for a run
///
/// Percentages are clamped so they never go backwards and stay below 100
/// until the last page is done.
pub(crate) struct ProgressTracker {
    total_pages: u32,
    last_percentage: u8,
    recent: VecDeque<Duration>,
}

impl ProgressTracker {
    pub(crate) fn new(total_pages: u32) -> Self {
        Self {
            total_pages,
            last_percentage: 0,
            recent: VecDeque::with_capacity(ETA_WINDOW),
        }
    }

    /// Sample emitted while `position` (1-based) is rendering
    pub(crate) fn page_progress(&self, position: u32, page_pct: u8) -> ExtractionProgress {
        ExtractionProgress {
            current_page: position,
            total_pages: self.total_pages,
            percentage: self.last_percentage,
            current_page_progress: Some(page_pct.min(100)),
            estimated_time_remaining_secs: None,
            memory_usage_mb: None,
            status_message: None,
        }
    }

    /// Sample emitted once `position` (1-based) is done
    pub(crate) fn page_done(
        &mut self,
        position: u32,
        page_number: u32,
        took: Duration,
    ) -> ExtractionProgress {
        if self.recent.len() == ETA_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(took);

        let mut percentage = if self.total_pages == 0 {
            100
        } else {
            ((position as f64 / self.total_pages as f64) * 100.0).round() as u8
        };
        if position < self.total_pages {
            percentage = percentage.min(99);
        }
        let percentage = percentage.max(self.last_percentage);
        self.last_percentage = percentage;

        let remaining = self.total_pages.saturating_sub(position);
        ExtractionProgress {
            current_page: position,
            total_pages: self.total_pages,
            percentage,
            current_page_progress: Some(100),
            estimated_time_remaining_secs: Some(
                self.average_page_time().as_secs_f64() * remaining as f64,
            ),
            memory_usage_mb: None,
            status_message: Some(format!("Extracted page {page_number}")),
        }
    }

    /// Final sample of a run with nothing to extract
    pub(crate) fn empty_run(&mut self) -> ExtractionProgress {
        self.last_percentage = 100;
        ExtractionProgress {
            current_page: 0,
            total_pages: 0,
            percentage: 100,
            current_page_progress: None,
            estimated_time_remaining_secs: Some(0.0),
            memory_usage_mb: None,
            status_message: Some("No pages to extract".to_string()),
        }
    }

    fn average_page_time(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        self.recent.iter().sum::<Duration>() / self.recent.len() as u32
    }
}
