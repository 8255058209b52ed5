//! Batch fan-out through the worker pools.

use mediaflow_core::error::{ErrorKind, codes};
use mediaflow_core::types::{OperationKind, TransformParams};
use mediaflow_entity::batch::BatchStatus;
use mediaflow_entity::job::JobStatus;
use mediaflow_realtime::PipelineEvent;
use mediaflow_service::{BatchFile, CreateBatchRequest};

use crate::helpers::{TestApp, WAIT};

fn request(group_size: usize) -> CreateBatchRequest {
    CreateBatchRequest {
        name: "catalog refresh".to_string(),
        description: Some("resize product shots".to_string()),
        tenant_id: Some("shop-42".to_string()),
        kind: OperationKind::new(OperationKind::IMAGE_RESIZE),
        params: TransformParams::new(),
        group_size: Some(group_size),
        webhook_url: Some("https://client.example.com/hooks/batch".to_string()),
        webhook_secret: None,
    }
}

fn files(names: &[&str]) -> Vec<BatchFile> {
    names
        .iter()
        .map(|n| BatchFile::new(format!("inputs/{n}")).named(*n))
        .collect()
}

async fn wait_batch_terminal(mut sub: mediaflow_realtime::Subscription) -> Vec<PipelineEvent> {
    tokio::time::timeout(WAIT, async {
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        events
    })
    .await
    .expect("batch did not finish")
}

#[tokio::test]
async fn test_batch_with_one_failure_completes_with_counts() {
    let app = TestApp::new().await;
    let batches = app.pipeline.batches();
    let batch = batches.create_batch(request(3)).await.unwrap();
    let batch = batches
        .add_files(batch.id, files(&["a.png", "b.png", "broken.png", "d.png"]))
        .await
        .unwrap();
    assert_eq!(batch.total_files, 4);

    let sub = batches.subscribe(batch.id).await.unwrap();
    batches.start(batch.id).await.unwrap();
    let events = wait_batch_terminal(sub).await;

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::BatchProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "batch progress went backwards: {progress:?}");

    let done = batches.get(batch.id).await.unwrap();
    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.processed_files, 3);
    assert_eq!(done.failed_files, 1);
    let failed: Vec<_> = done
        .members
        .iter()
        .filter(|m| m.status == JobStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].filename.as_deref(), Some("broken.png"));

    let sent = app.expect_webhooks(&batch.id.to_string(), 1).await;
    assert_eq!(sent[0].status, "completed");
    assert_eq!(sent[0].total_files, Some(4));
    assert_eq!(sent[0].processed_files, Some(3));
    assert_eq!(sent[0].failed_files, Some(1));

    for member in &done.members {
        assert!(app.webhooks.deliveries_for(&member.job_id.to_string()).is_empty());
    }

    let stats = batches.statistics(Some("shop-42")).await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total_files, 4);
    app.shutdown().await;
}

#[tokio::test]
async fn test_files_cannot_be_added_after_start() {
    let app = TestApp::new().await;
    let batches = app.pipeline.batches();
    let batch = batches.create_batch(request(3)).await.unwrap();
    batches.add_files(batch.id, files(&["a.png"])).await.unwrap();
    batches.start(batch.id).await.unwrap();

    let err = batches
        .add_files(batch.id, files(&["late.png"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert!(err.has_code(codes::BATCH_ALREADY_STARTED));

    let err = batches.start(batch.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    app.shutdown().await;
}

#[tokio::test]
async fn test_cancel_stops_later_groups() {
    let app = TestApp::new().await;
    let batches = app.pipeline.batches();
    let batch = batches.create_batch(request(1)).await.unwrap();
    let batch = batches
        .add_files(batch.id, files(&["slow-1.png", "b.png", "c.png"]))
        .await
        .unwrap();
    batches.start(batch.id).await.unwrap();

    let first = batch.members[0].job_id;
    let mut updates = app.pipeline.jobs().watch(first).await.unwrap();
    tokio::time::timeout(WAIT, updates.wait_for(|j| j.progress >= 25))
        .await
        .unwrap()
        .unwrap();

    let cancelled = batches.cancel(batch.id).await.unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);
    app.transform.release_slow();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    for member in &batch.members {
        let job = app.pipeline.jobs().get(member.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
    assert_eq!(app.transform.calls(), 1);

    let err = app.pipeline.jobs().cancel(first).await.unwrap_err();
    assert!(err.has_code(codes::MEMBER_JOB) || err.has_code(codes::JOB_TERMINAL));

    let sent = app.expect_webhooks(&batch.id.to_string(), 1).await;
    assert_eq!(sent[0].status, "cancelled");
    app.shutdown().await;
}

#[tokio::test]
async fn test_group_subscribers_see_every_tenant_batch() {
    let app = TestApp::new().await;
    let batches = app.pipeline.batches();
    let mut group = batches.subscribe_group("shop-42");

    let first = batches.create_batch(request(2)).await.unwrap();
    batches.add_files(first.id, files(&["a.png"])).await.unwrap();
    let second = batches.create_batch(request(2)).await.unwrap();
    batches.add_files(second.id, files(&["b.png"])).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        if let Some(PipelineEvent::BatchProgress { batch_id, .. }) = group.recv().await {
            seen.push(batch_id);
        }
    }
    assert_eq!(seen, vec![first.id, second.id]);
    assert_eq!(batches.list_active(Some("shop-42")).await.unwrap().len(), 2);
    app.shutdown().await;
}
