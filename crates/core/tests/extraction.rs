mod common;

use parking_lot::Mutex;
use std::sync::Arc;

use common::{vault, FailingEngine, MemoryBridge};
use docvault_core::{
    ColorSpace, ConversionSettings, Dpi, ErrorKind, ExtractionProgress, ExtractionState,
    OpenOptions, PageRange, ProgressCallback, RasterFormat, VaultError,
};
use docvault_pdf_engine::LopdfEngine;

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ExtractionProgress>>>) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let callback: ProgressCallback = Arc::new(move |sample: &ExtractionProgress| {
        sink.lock().push(sample.clone());
    });
    (callback, samples)
}

#[tokio::test]
async fn explicit_list_yields_requested_pages_in_order() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("five.pdf", 5);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();

    let settings = ConversionSettings::default().with_pages(PageRange::List(vec![3, 2]));
    let pages = vault.extract_all(&handle, &settings, None).await.unwrap();

    let numbers: Vec<u32> = pages.iter().map(|page| page.page_number).collect();
    assert_eq!(numbers, vec![2, 3]);
    assert!(pages.iter().all(|page| page.document_path == path));
    assert_eq!(pages[0].file_name(), "five-page-002.png");
}

#[tokio::test]
async fn span_is_clipped_to_the_document() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("three.pdf", 3);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();

    let settings =
        ConversionSettings::default().with_pages(PageRange::Span { start: 2, end: 40 });
    let pages = vault.extract_all(&handle, &settings, None).await.unwrap();

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[1].page_number, 3);
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_100_at_the_end() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("progress.pdf", 3);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();
    let (callback, samples) = recorder();

    vault
        .extract_all(&handle, &ConversionSettings::default(), Some(callback))
        .await
        .unwrap();

    let samples = samples.lock().clone();
    assert!(samples
        .windows(2)
        .all(|pair| pair[0].percentage <= pair[1].percentage));

    let (last, earlier) = samples.split_last().unwrap();
    assert_eq!(last.percentage, 100);
    assert_eq!(last.current_page, 3);
    assert_eq!(last.total_pages, 3);
    assert_eq!(last.estimated_time_remaining_secs, Some(0.0));
    assert!(earlier.iter().all(|sample| sample.percentage < 100));

    let page_done: Vec<u8> = samples
        .iter()
        .filter(|sample| sample.current_page_progress == Some(100))
        .map(|sample| sample.percentage)
        .collect();
    assert_eq!(page_done, vec![33, 67, 100]);
    assert!(samples
        .iter()
        .any(|sample| matches!(sample.current_page_progress, Some(pct) if pct < 100)));
    assert!(samples
        .iter()
        .filter(|sample| sample.current_page_progress == Some(100))
        .all(|sample| sample.memory_usage_mb == Some(256.0)));
}

#[tokio::test]
async fn output_follows_settings() {
    let bridge = MemoryBridge::new();
    // 144 x 72 pt pages
    let path = bridge.add_document("scaled.pdf", 1);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();

    let settings = ConversionSettings::default()
        .with_dpi(Dpi::D150)
        .with_format(RasterFormat::Lossy { quality: 70 })
        .with_color_space(ColorSpace::Grayscale);
    let pages = vault.extract_all(&handle, &settings, None).await.unwrap();

    let page = &pages[0];
    assert_eq!((page.width, page.height), (300, 150));
    assert!(page.data.starts_with(&[0xFF, 0xD8]));
    assert!(page.file_name().ends_with(".jpg"));
}

#[tokio::test]
async fn concurrent_run_on_same_document_is_rejected() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("shared.pdf", 3);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();
    let settings = ConversionSettings::default();

    let (first, second) = tokio::join!(
        vault.extract_all(&handle, &settings, None),
        vault.extract_all(&handle, &settings, None),
    );

    assert_eq!(first.unwrap().len(), 3);
    assert!(matches!(second, Err(VaultError::ExtractionInProgress(id)) if id == handle.id()));

    // The slot is free again once the first run finished
    assert!(vault.extract_all(&handle, &settings, None).await.is_ok());
}

#[tokio::test]
async fn cancellation_stops_before_the_next_page() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("long.pdf", 6);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();
    let id = handle.id();

    let pipeline = vault.pipeline().clone();
    let on_progress: ProgressCallback = Arc::new(move |sample: &ExtractionProgress| {
        if sample.current_page == 2 && sample.current_page_progress == Some(100) {
            assert!(pipeline.cancel(id));
        }
    });

    let mut received = Vec::new();
    let err = vault
        .extract(&handle, &ConversionSettings::default(), Some(on_progress), |page| {
            received.push(page.page_number)
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        VaultError::ExtractionCancelled { pages_done: 2, .. }
    ));
    assert!(err.is_cancellation());
    assert_eq!(received, vec![1, 2]);
    assert_eq!(vault.extraction_state(id), ExtractionState::Cancelled);
    assert!(!vault.cancel_extraction(id));
}

#[tokio::test]
async fn page_failure_stops_the_run_and_keeps_earlier_pages() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("broken.pdf", 5);
    let vault = vault(&bridge, Box::new(FailingEngine::failing_on_page(3)));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();

    let mut received = Vec::new();
    let err = vault
        .extract(&handle, &ConversionSettings::default(), None, |page| {
            received.push(page.page_number)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, VaultError::PageRender { page: 3, .. }));
    assert!(!err.is_cancellation());
    assert_eq!(received, vec![1, 2]);
    assert_eq!(vault.extraction_state(handle.id()), ExtractionState::Failed);

    let settings = ConversionSettings::default().with_pages(PageRange::List(vec![4, 5]));
    assert_eq!(
        vault.extract_all(&handle, &settings, None).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn closed_handle_is_rejected() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("closed.pdf", 2);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();

    assert!(vault.close(&handle).await);
    assert!(!vault.close(&handle).await);

    let err = vault
        .extract_all(&handle, &ConversionSettings::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
}

#[tokio::test]
async fn empty_selection_completes_with_a_final_sample() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("tiny.pdf", 3);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();
    let (callback, samples) = recorder();

    let settings = ConversionSettings::default().with_pages(PageRange::List(vec![7, 9]));
    let pages = vault
        .extract_all(&handle, &settings, Some(callback))
        .await
        .unwrap();

    assert!(pages.is_empty());
    let samples = samples.lock();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].percentage, 100);
    assert_eq!(vault.extraction_state(handle.id()), ExtractionState::Completed);
}

#[tokio::test]
async fn invalid_settings_never_start_a_run() {
    let bridge = MemoryBridge::new();
    let path = bridge.add_document("settings.pdf", 1);
    let vault = vault(&bridge, Box::new(LopdfEngine::new()));
    let handle = vault.open(&path, OpenOptions::new()).await.unwrap();

    let settings = ConversionSettings::default().with_format(RasterFormat::Lossy { quality: 0 });
    let err = vault.extract_all(&handle, &settings, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidSettings);
    assert_eq!(vault.extraction_state(handle.id()), ExtractionState::Idle);
}
