//! Standalone job lifecycle through the worker pools.

use mediaflow_core::error::codes;
use mediaflow_core::traits::transform::TransformError;
use mediaflow_core::types::{OperationKind, TransformParams};
use mediaflow_entity::job::{JobPriority, JobStatus};
use mediaflow_realtime::PipelineEvent;
use mediaflow_service::CreateJobRequest;

use crate::helpers::{TestApp, WAIT};

fn request(input: &str) -> CreateJobRequest {
    let mut params = TransformParams::new();
    params.insert("width".into(), serde_json::json!(800));
    CreateJobRequest {
        input: format!("inputs/{input}"),
        kind: OperationKind::new(OperationKind::IMAGE_RESIZE),
        params,
        priority: JobPriority::Normal,
        webhook_url: Some("https://client.example.com/hooks/job".to_string()),
        webhook_secret: Some("shh".to_string()),
        tenant_id: Some("acme".to_string()),
    }
}

#[tokio::test]
async fn test_job_completes_with_ordered_progress_and_one_webhook() {
    let app = TestApp::new().await;
    let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
    app.pipeline.queue().pause(&kind).await.unwrap();
    let job = app.pipeline.jobs().create_job(request("cat.png")).await.unwrap();
    let mut events = app.pipeline.jobs().subscribe(job.id).await.unwrap();
    app.pipeline.queue().resume(&kind).await.unwrap();

    let done = tokio::time::timeout(WAIT, app.pipeline.jobs().wait_terminal(job.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.attempts, 1);
    assert_eq!(
        done.result.as_ref().map(|r| r.location.as_str()),
        Some("outputs/inputs/cat.png.webp")
    );

    let mut progress = Vec::new();
    while let Some(event) = events.recv().await {
        if let PipelineEvent::JobProgress { progress: p, .. } = event {
            progress.push(p);
        }
    }
    assert_eq!(progress.first(), Some(&0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {progress:?}");
    assert_eq!(progress.last(), Some(&100));

    let sent = app.expect_webhooks(&job.id.to_string(), 1).await;
    assert_eq!(sent[0].status, "completed");
    assert_eq!(sent[0].tenant_id.as_deref(), Some("acme"));
    assert!(sent[0].result.is_some());
    assert_eq!(
        app.webhooks.deliveries()[0].0.secret.as_deref(),
        Some("shh")
    );
    app.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_is_redelivered() {
    let app = TestApp::new().await;
    let job = app.pipeline.jobs().create_job(request("flaky.png")).await.unwrap();

    let done = tokio::time::timeout(WAIT, app.pipeline.jobs().wait_terminal(job.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 2);
    assert!(done.error.is_none());
    app.shutdown().await;
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_job() {
    let app = TestApp::new().await;
    app.transform
        .fail_next(TransformError::transient("decoder busy"), 3)
        .await;
    let job = app.pipeline.jobs().create_job(request("dog.png")).await.unwrap();

    let done = tokio::time::timeout(WAIT, app.pipeline.jobs().wait_terminal(job.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.attempts, 3);
    assert_eq!(app.transform.calls(), 3);
    assert_eq!(
        done.error.as_ref().map(|e| e.message.as_str()),
        Some("decoder busy")
    );

    let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
    let stats = app.pipeline.queue().stats(&kind).await.unwrap();
    assert_eq!(stats.failed, 1);
    app.expect_webhooks(&job.id.to_string(), 1).await;
    app.shutdown().await;
}

#[tokio::test]
async fn test_cancel_while_processing_discards_late_result() {
    let app = TestApp::new().await;
    let job = app.pipeline.jobs().create_job(request("slow.png")).await.unwrap();

    let mut updates = app.pipeline.jobs().watch(job.id).await.unwrap();
    tokio::time::timeout(WAIT, updates.wait_for(|j| j.progress >= 25))
        .await
        .unwrap()
        .unwrap();

    let cancelled = app.pipeline.jobs().cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    app.transform.release_slow();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let stored = app.pipeline.jobs().get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.result.is_none());

    let err = app.pipeline.jobs().report_progress(job.id, stored.delivery.unwrap_or(0), 80).await.unwrap_err();
    assert!(err.has_code(codes::JOB_TERMINAL));

    let sent = app.expect_webhooks(&job.id.to_string(), 1).await;
    assert_eq!(sent[0].status, "cancelled");
    app.shutdown().await;
}

#[tokio::test]
async fn test_unknown_kind_is_rejected() {
    let app = TestApp::new().await;
    let mut req = request("cat.png");
    req.kind = OperationKind::new("hologram-render");
    let err = app.pipeline.jobs().create_job(req).await.unwrap_err();
    assert!(err.has_code(codes::UNKNOWN_KIND));
    assert!(err.is_client_error());
    app.shutdown().await;
}
