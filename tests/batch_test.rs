//! Batch uploads and deletes against an in-memory transport

mod common;

use bytes::Bytes;
use common::*;
use hyper::Method;
use s3kit::s3::{BatchClient, BatchUploadItem, UploadOptions};
use std::time::Duration;

fn key_of(request: &RecordedRequest) -> String {
    request.path().trim_start_matches("/test-bucket/").to_string()
}

#[tokio::test]
async fn test_batch_upload_keeps_input_order() {
    let transport = MockTransport::with_delay(
        |request| {
            if key_of(request) == "b.txt" {
                response(500, error_xml("InternalError", "disk full"))
            } else {
                response_with_headers(200, &[("etag", "\"ok\"")], "")
            }
        },
        // a.txt finishes after b.txt
        |request| {
            if key_of(request) == "a.txt" {
                Duration::from_millis(50)
            } else {
                Duration::from_millis(5)
            }
        },
    );
    let batch = BatchClient::new(client(transport.clone()));

    let items = vec![
        BatchUploadItem::new("a.txt", "alpha"),
        BatchUploadItem::new("b.txt", "bravo"),
        BatchUploadItem::new("c.txt", "charlie"),
    ];
    let results = batch.batch_upload(items, 2).await;

    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["a.txt", "b.txt", "c.txt"]);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[1].error.as_deref().unwrap().contains("500"));
    assert!(results[2].success);
    assert!(results[2].error.is_none());

    // The failure does not stop later items
    assert_eq!(transport.requests().len(), 3);
    assert!(transport.peak_in_flight() <= 2);
}

#[tokio::test]
async fn test_batch_upload_windows_are_sequential() {
    let transport = MockTransport::with_delay(
        |_| response_with_headers(200, &[("etag", "\"ok\"")], ""),
        |_| Duration::from_millis(20),
    );
    let batch = BatchClient::new(client(transport.clone()));

    let items: Vec<BatchUploadItem> = (0..7)
        .map(|i| BatchUploadItem::new(format!("file-{}.bin", i), Bytes::from(vec![i as u8; 64])))
        .collect();
    let results = batch.batch_upload(items, 3).await;

    assert_eq!(results.len(), 7);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(transport.peak_in_flight(), 3);

    // Windows of 3, 3 and 1: the second window starts only after the first
    let keys: Vec<String> = transport.requests().iter().map(key_of).collect();
    let first_window: Vec<&str> = keys[..3].iter().map(String::as_str).collect();
    for key in ["file-0.bin", "file-1.bin", "file-2.bin"] {
        assert!(first_window.contains(&key));
    }
    assert_eq!(keys[6], "file-6.bin");
}

#[tokio::test]
async fn test_batch_upload_zero_concurrency_is_sequential() {
    let transport = MockTransport::with_delay(
        |_| response_with_headers(200, &[("etag", "\"ok\"")], ""),
        |_| Duration::from_millis(5),
    );
    let batch = BatchClient::new(client(transport.clone()));

    let items = vec![BatchUploadItem::new("x", "1"), BatchUploadItem::new("y", "2")];
    let results = batch.batch_upload(items, 0).await;
    assert!(results.iter().all(|r| r.success));
    assert_eq!(transport.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_batch_upload_applies_options() {
    let transport = MockTransport::new(|_| response_with_headers(200, &[("etag", "\"ok\"")], ""));
    let batch = BatchClient::new(client(transport.clone()));

    let items = vec![BatchUploadItem::new("page.html", "<html/>")
        .with_options(UploadOptions::default().with_content_type("text/html"))];
    batch.batch_upload(items, 4).await;

    assert_eq!(transport.requests()[0].header("content-type"), Some("text/html"));
}

#[tokio::test]
async fn test_batch_upload_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"some notes").unwrap();

    let transport = MockTransport::new(|_| response_with_headers(200, &[("etag", "\"ok\"")], ""));
    let batch = BatchClient::new(client(transport.clone()));

    let item = BatchUploadItem::from_path("docs/notes.txt", &path);
    let results = batch.batch_upload(vec![item], 1).await;
    assert!(results[0].success);

    let request = &transport.requests()[0];
    assert_eq!(request.path(), "/test-bucket/docs/notes.txt");
    assert_eq!(request.body, Bytes::from_static(b"some notes"));
    assert_eq!(request.header("content-length"), Some("10"));
}

#[tokio::test]
async fn test_batch_upload_missing_file_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("present.txt");
    std::fs::write(&present, b"here").unwrap();
    let absent = dir.path().join("absent.txt");

    let transport = MockTransport::new(|_| response_with_headers(200, &[("etag", "\"ok\"")], ""));
    let batch = BatchClient::new(client(transport.clone()));

    // Building the item does not touch the filesystem
    let items = vec![
        BatchUploadItem::from_path("absent.txt", &absent),
        BatchUploadItem::from_path("present.txt", &present),
        BatchUploadItem::new("inline.txt", "inline"),
    ];
    let results = batch.batch_upload(items, 2).await;

    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["absent.txt", "present.txt", "inline.txt"]);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("absent.txt"));
    assert!(results[1].success);
    assert!(results[2].success);

    let uploaded: Vec<String> = transport.requests().iter().map(key_of).collect();
    assert_eq!(uploaded.len(), 2);
    assert!(!uploaded.contains(&"absent.txt".to_string()));
}

#[tokio::test]
async fn test_batch_upload_opens_files_per_window() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let late = dir.path().join("late.txt");
    std::fs::write(&first, b"first").unwrap();

    let transport = MockTransport::new(|_| response_with_headers(200, &[("etag", "\"ok\"")], ""));
    let batch = BatchClient::new(client(transport.clone()));

    // late.txt does not exist yet when the batch is built
    let items = vec![
        BatchUploadItem::from_path("first.txt", &first),
        BatchUploadItem::from_path("late.txt", &late),
    ];
    std::fs::write(&late, b"late").unwrap();
    let results = batch.batch_upload(items, 1).await;

    assert!(results.iter().all(|r| r.success));
    let requests = transport.requests();
    assert_eq!(requests[1].body, Bytes::from_static(b"late"));
}

#[tokio::test]
async fn test_batch_delete_reports_every_key() {
    let transport = MockTransport::with_delay(
        |request| match key_of(request).as_str() {
            "missing" => response(404, error_xml("NoSuchKey", "gone")),
            "locked" => response(403, error_xml("AccessDenied", "Access Denied")),
            _ => response(204, ""),
        },
        |_| Duration::from_millis(10),
    );
    let batch = BatchClient::new(client(transport.clone()));

    let results = batch.batch_delete(["one", "missing", "locked", "two"]).await;

    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["one", "missing", "locked", "two"]);
    assert!(results[0].success);
    // Deleting a missing key succeeds
    assert!(results[1].success);
    assert!(!results[2].success);
    assert!(results[3].success);

    let requests = transport.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests.iter().all(|r| r.method == Method::DELETE));
    // All deletes run at once
    assert_eq!(transport.peak_in_flight(), 4);
}

#[tokio::test]
async fn test_batch_delete_empty() {
    let transport = MockTransport::new(|_| response(204, ""));
    let batch = BatchClient::new(client(transport.clone()));

    let results = batch.batch_delete(Vec::<String>::new()).await;
    assert!(results.is_empty());
    assert!(transport.requests().is_empty());
}
