//! Chunked upload sessions through the assembled pipeline.

use std::sync::Arc;

use bytes::Bytes;

use mediaflow_core::error::codes;
use mediaflow_entity::upload::UploadStatus;
use mediaflow_realtime::{PipelineEvent, Topic};
use mediaflow_storage::InitUpload;

use crate::helpers::TestApp;

const MIB: u64 = 1024 * 1024;

fn init(total_size: u64, chunk_size: u64) -> InitUpload {
    InitUpload {
        filename: "interview.mov".to_string(),
        total_size,
        content_type: "video/quicktime".to_string(),
        chunk_size: Some(chunk_size),
        webhook_url: Some("https://client.example.com/hooks/upload".to_string()),
        webhook_secret: None,
    }
}

fn chunk(byte: u8, len: u64) -> Bytes {
    Bytes::from(vec![byte; len as usize])
}

#[tokio::test]
async fn test_three_chunk_upload_reports_progress_and_assembles() {
    let app = TestApp::new().await;
    let uploads = app.pipeline.uploads();
    let session = uploads.init(init(15 * MIB, 5 * MIB)).await.unwrap();
    assert_eq!(session.expected_chunks, 3);
    let mut events = app.pipeline.bus().subscribe(Topic::Upload(session.id));

    let progress = uploads.put_chunk(session.id, 0, chunk(b'a', 5 * MIB)).await.unwrap();
    assert_eq!(progress.progress, 33);
    let progress = uploads.put_chunk(session.id, 2, chunk(b'c', 5 * MIB)).await.unwrap();
    assert_eq!(progress.progress, 67);
    assert_eq!(progress.received_indices, vec![0, 2]);
    assert_eq!(progress.status, UploadStatus::Receiving);

    let done = uploads.put_chunk(session.id, 1, chunk(b'b', 5 * MIB)).await.unwrap();
    assert_eq!(done.status, UploadStatus::Completed);
    assert_eq!(done.progress, 100);
    let artifact = done.artifact.expect("assembled artifact");

    let data = app.store_get(&artifact).await;
    assert_eq!(data.len() as u64, 15 * MIB);
    assert_eq!(data[0], b'a');
    assert_eq!(data[(5 * MIB) as usize], b'b');
    assert_eq!(data[(10 * MIB) as usize], b'c');

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        if let PipelineEvent::UploadProgress { progress, .. } = event {
            seen.push(progress);
        }
    }
    assert_eq!(seen.first(), Some(&33));
    assert_eq!(seen.last(), Some(&100));

    let sent = app.expect_webhooks(&session.id.to_string(), 1).await;
    assert_eq!(sent[0].status, "completed");
    app.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_final_chunks_complete_once() {
    let app = TestApp::new().await;
    let uploads = Arc::clone(app.pipeline.uploads());
    let session = uploads.init(init(4 * MIB, MIB)).await.unwrap();
    uploads.put_chunk(session.id, 0, chunk(1, MIB)).await.unwrap();
    uploads.put_chunk(session.id, 1, chunk(2, MIB)).await.unwrap();

    let mut tasks = Vec::new();
    for (index, byte) in [(2, 3u8), (3, 4u8), (3, 4u8)] {
        let uploads = Arc::clone(&uploads);
        let id = session.id;
        tasks.push(tokio::spawn(async move {
            uploads.put_chunk(id, index, chunk(byte, MIB)).await
        }));
    }

    let mut completed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(progress) if progress.status == UploadStatus::Completed => completed += 1,
            Ok(_) => {}
            Err(e) => assert!(e.has_code(codes::SESSION_ALREADY_COMPLETED), "unexpected error {e}"),
        }
    }
    assert_eq!(completed, 1);

    let final_state = uploads.status(session.id).await.unwrap();
    assert_eq!(final_state.status, UploadStatus::Completed);
    app.expect_webhooks(&session.id.to_string(), 1).await;
    app.shutdown().await;
}

#[tokio::test]
async fn test_out_of_range_chunk_and_cancelled_session_rejected() {
    let app = TestApp::new().await;
    let uploads = app.pipeline.uploads();
    let session = uploads.init(init(10 * MIB, 5 * MIB)).await.unwrap();

    let err = uploads
        .put_chunk(session.id, 2, chunk(0, 5 * MIB))
        .await
        .unwrap_err();
    assert!(err.has_code(codes::INVALID_CHUNK_INDEX));

    uploads.cancel(session.id).await.unwrap();
    let err = uploads
        .put_chunk(session.id, 0, chunk(0, 5 * MIB))
        .await
        .unwrap_err();
    assert!(err.has_code(codes::SESSION_CLOSED));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(app.webhooks.deliveries_for(&session.id.to_string()).is_empty());
    app.shutdown().await;
}
