mod common;

use s3_webp_converter::services::storage::{MemoryObjectStore, StoreOp};
use s3_webp_converter::services::transcoder::WebpTranscoder;
use s3_webp_converter::{
    BatchStats, ConversionOutcome, ConverterConfig, ErrorKind, ImageTranscoder, SkipReason,
    StoreError,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

#[tokio::test]
async fn test_mixed_inputs_convert_and_report_unsupported() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("a.jpg", common::jpeg(16, 16));
    store.insert("b.png", common::png_with_alpha(16, 16));
    store.insert("c.txt", "plain text, not an image");

    let pipeline = common::setup_pipeline(store.clone(), ConverterConfig::development("photos"));
    let report = pipeline
        .convert_images(Some(keys(&["a.jpg", "b.png", "c.txt"])))
        .await
        .unwrap();

    assert_eq!(report.stats.attempted, 3);
    assert_eq!(report.stats.successful, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.results.len(), 3);

    let failed = &report.results[2];
    assert_eq!(failed.source_key, "c.txt");
    assert_eq!(failed.error_kind(), Some(ErrorKind::UnsupportedOrCorruptImage));

    assert!(store.contains("webp-images/a.webp"));
    assert!(store.contains("webp-images/b.webp"));
    assert_eq!(
        store.content_type("webp-images/a.webp").as_deref(),
        Some("image/webp")
    );

    let transcoder = WebpTranscoder::new();
    let b = store.object("webp-images/b.webp").unwrap();
    assert!(transcoder.inspect(&b).unwrap().has_alpha);

    // Originals stay when delete_original is off.
    assert!(store.contains("a.jpg"));
    assert_eq!(store.delete_calls(), 0);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let store = Arc::new(MemoryObjectStore::new());
    for i in 0..5 {
        store.insert(format!("raw/img{}.jpg", i), common::jpeg(8, 8));
    }
    store.insert("raw/notes.md", "skip me");

    let mut config = ConverterConfig::development("photos");
    config.source_prefix = "raw/".to_string();
    config.dry_run = true;
    config.delete_original = true;

    let pipeline = common::setup_pipeline(store.clone(), config);
    let report = pipeline.convert_images(None).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.results.len(), 5);
    assert!(report
        .results
        .iter()
        .all(|r| r.outcome == ConversionOutcome::Previewed));
    assert_eq!(report.results[0].destination_key, "webp-images/img0.webp");

    assert_eq!(store.put_calls(), 0);
    assert_eq!(store.delete_calls(), 0);
    assert!(store
        .ops()
        .iter()
        .all(|op| matches!(op, StoreOp::List(_))));
}

#[tokio::test]
async fn test_failed_upload_keeps_original() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("a.jpg", common::jpeg(8, 8));
    store.insert("b.jpg", common::jpeg(8, 8));
    store.fail_put(
        "webp-images/b.webp",
        StoreError::AccessDenied("webp-images/b.webp".to_string()),
    );

    let mut config = ConverterConfig::development("photos");
    config.delete_original = true;

    let pipeline = common::setup_pipeline(store.clone(), config);
    let report = pipeline
        .convert_images(Some(keys(&["a.jpg", "b.jpg"])))
        .await
        .unwrap();

    assert_eq!(report.stats.successful, 1);
    assert_eq!(
        report.results[1].error_kind(),
        Some(ErrorKind::DestinationStoreError)
    );

    assert!(!store.contains("a.jpg"));
    assert!(store.contains("b.jpg"));
    assert!(!store
        .ops()
        .contains(&StoreOp::Delete("b.jpg".to_string())));
}

#[tokio::test]
async fn test_existing_outputs_are_skipped() {
    let store = Arc::new(MemoryObjectStore::new());
    store.insert("a.jpg", common::jpeg(8, 8));
    store.insert("webp-images/a.webp", "already converted");

    let pipeline = common::setup_pipeline(store.clone(), ConverterConfig::development("photos"));
    let report = pipeline.convert_images(None).await.unwrap();

    assert_eq!(report.stats.attempted, 1);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(
        report.results[0].outcome,
        ConversionOutcome::Skipped(SkipReason::AlreadyExists)
    );
    assert_eq!(store.put_calls(), 0);
}

async fn run_large(max_workers: usize) -> (BatchStats, Vec<String>) {
    let store = Arc::new(MemoryObjectStore::new());
    let mut names = Vec::new();
    for i in 0..1000 {
        let key = format!("bulk/{:04}.jpg", i);
        match i % 10 {
            // Corrupt payloads and missing sources mixed in with valid images.
            3 => store.insert(key.clone(), "not really a jpeg"),
            7 => {}
            _ => store.insert(key.clone(), common::jpeg(4, 4)),
        }
        names.push(key);
    }

    let mut config = ConverterConfig::development("photos");
    config.max_workers = max_workers;
    config.batch_size = 64;

    let pipeline = common::setup_pipeline(store, config);
    let report = pipeline.convert_images(Some(names)).await.unwrap();
    let order = report.results.into_iter().map(|r| r.source_key).collect();
    (report.stats, order)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_count_does_not_change_totals() {
    let (serial, serial_order) = run_large(1).await;
    let (parallel, parallel_order) = run_large(16).await;

    assert_eq!(serial, parallel);
    assert_eq!(serial.attempted, 1000);
    assert_eq!(serial.successful, 800);
    assert_eq!(serial.failed, 200);
    assert_eq!(
        serial.attempted,
        serial.successful + serial.failed + serial.skipped
    );

    let expected: Vec<String> = (0..1000).map(|i| format!("bulk/{:04}.jpg", i)).collect();
    assert_eq!(serial_order, expected);
    assert_eq!(parallel_order, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_snapshots_stay_consistent() {
    let store = Arc::new(MemoryObjectStore::new());
    let mut names = Vec::new();
    for i in 0..30 {
        let key = format!("p/{}.png", i);
        if i % 4 == 0 {
            store.insert(key.clone(), "corrupt");
        } else {
            store.insert(key.clone(), common::png_with_alpha(4, 4));
        }
        names.push(key);
    }

    let mut config = ConverterConfig::development("photos");
    config.max_workers = 6;
    config.batch_size = 8;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = common::setup_pipeline(store, config).with_progress(tx);
    let report = pipeline.convert_images(Some(names)).await.unwrap();
    drop(pipeline);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(events.len(), 4);
    for event in &events {
        assert_eq!(event.batch_count, 4);
        assert_eq!(event.total, 30);
        let s = event.stats;
        assert_eq!(s.attempted, s.successful + s.failed + s.skipped);
        assert!(s.attempted as usize >= event.completed);
    }
    assert_eq!(report.stats.attempted, 30);
    assert_eq!(report.stats.failed, 8);
}
