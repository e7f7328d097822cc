//! Bounded-window range reads.
//!
//! Large files are read as a sequence of byte ranges. Issuing one request per
//! range at once would let peak memory grow with the file, and issuing them
//! one at a time would serialize I/O latency. [`BatchWindow`] sits between
//! the two: ranges are issued in offset order, `width` at a time, and the
//! next batch starts only after every read in the current batch resolved.
//! Peak transient memory is therefore bounded by `width * chunk_size`.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// A contiguous byte range within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Offset of the first byte
    pub offset: u64,
    /// Number of bytes
    pub len: u64,
}

impl ByteRange {
    /// Create a new range
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// Offset one past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Split `total` bytes into consecutive ranges of at most `chunk_size`
///
/// The ranges tile `[0, total)` with no gaps or overlaps. A zero
/// `chunk_size` is treated as one.
pub fn plan_ranges(total: u64, chunk_size: u64) -> Vec<ByteRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::with_capacity(total.div_ceil(chunk_size) as usize);
    let mut offset = 0;
    while offset < total {
        let len = chunk_size.min(total - offset);
        ranges.push(ByteRange::new(offset, len));
        offset += len;
    }
    ranges
}

/// Fixed-width batch executor for range reads
#[derive(Debug, Clone, Copy)]
pub struct BatchWindow {
    width: usize,
}

impl BatchWindow {
    /// Create a window allowing `width` simultaneous requests (at least one)
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    /// Maximum number of requests in flight
    pub fn width(&self) -> usize {
        self.width
    }

    /// Read every range through `fetch`, one batch at a time
    ///
    /// Results are returned in completion order, tagged with their range;
    /// callers that need file order must sort by `range.offset`. After each
    /// batch `on_batch` receives the cumulative number of bytes read.
    ///
    /// The first failing read aborts the whole run: the remaining reads of
    /// that batch are dropped and no further batch is issued.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        ranges: &[ByteRange],
        mut fetch: F,
        mut on_batch: P,
    ) -> Result<Vec<(ByteRange, T)>, E>
    where
        F: FnMut(ByteRange) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(u64),
    {
        let mut completed = Vec::with_capacity(ranges.len());
        let mut bytes_done = 0u64;

        for (batch_index, batch) in ranges.chunks(self.width).enumerate() {
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|range| {
                    let range = *range;
                    let read = fetch(range);
                    async move { (range, read.await) }
                })
                .collect();

            while let Some((range, result)) = in_flight.next().await {
                let value = result?;
                bytes_done += range.len;
                completed.push((range, value));
            }

            tracing::debug!(
                batch = batch_index,
                requests = batch.len(),
                bytes_done,
                "range batch complete"
            );
            on_batch(bytes_done);
        }

        Ok(completed)
    }
}

impl Default for BatchWindow {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn test_plan_ranges_tiles_file() {
        for (total, chunk) in [(0, 4), (1, 4), (4, 4), (10, 4), (10_000_001, 1_000_000)] {
            let ranges = plan_ranges(total, chunk);
            let sum: u64 = ranges.iter().map(|r| r.len).sum();
            assert_eq!(sum, total);

            let mut expected_offset = 0;
            for range in &ranges {
                assert_eq!(range.offset, expected_offset);
                assert!(range.len > 0 && range.len <= chunk);
                expected_offset = range.end();
            }
            assert_eq!(expected_offset, total);
        }
    }

    #[test]
    fn test_plan_ranges_zero_chunk() {
        let ranges = plan_ranges(3, 0);
        assert_eq!(ranges.len(), 3);
    }

    #[test]
    fn test_window_width_clamped() {
        assert_eq!(BatchWindow::new(0).width(), 1);
        assert_eq!(BatchWindow::default().width(), 3);
    }

    #[tokio::test]
    async fn test_run_reads_every_range() {
        let ranges = plan_ranges(10, 3);
        let window = BatchWindow::new(2);
        let mut progress = Vec::new();

        let results = window
            .run(
                &ranges,
                |range| async move { Ok::<_, ()>(range.offset) },
                |done| progress.push(done),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(progress, vec![6, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bounds_in_flight_requests() {
        let ranges = plan_ranges(100, 10);
        let window = BatchWindow::new(3);
        let in_flight = Cell::new(0usize);
        let peak = Cell::new(0usize);

        window
            .run(
                &ranges,
                |range| {
                    let in_flight = &in_flight;
                    let peak = &peak;
                    async move {
                        in_flight.set(in_flight.get() + 1);
                        peak.set(peak.get().max(in_flight.get()));
                        // Later ranges finish first to shuffle completion order
                        tokio::time::sleep(Duration::from_millis(100 - range.offset)).await;
                        in_flight.set(in_flight.get() - 1);
                        Ok::<_, ()>(())
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(peak.get(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_at_first_error() {
        let ranges = plan_ranges(40, 10);
        let window = BatchWindow::new(2);
        let issued = Cell::new(0usize);

        let result = window
            .run(
                &ranges,
                |range| {
                    issued.set(issued.get() + 1);
                    async move {
                        if range.offset == 10 {
                            Err("short read")
                        } else {
                            Ok(())
                        }
                    }
                },
                |_| {},
            )
            .await;

        assert_eq!(result.unwrap_err(), "short read");
        // Second batch never issued
        assert_eq!(issued.get(), 2);
    }
}
