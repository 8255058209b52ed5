//! Queue behavior observed through the running pipeline.

use mediaflow_core::types::OperationKind;
use mediaflow_entity::job::{JobPriority, JobStatus};
use mediaflow_service::CreateJobRequest;
use mediaflow_worker::{EnqueueOptions, ItemState};

use crate::helpers::{TestApp, WAIT, test_config};

fn request(input: &str, priority: JobPriority) -> CreateJobRequest {
    CreateJobRequest {
        input: format!("inputs/{input}"),
        kind: OperationKind::new(OperationKind::IMAGE_RESIZE),
        params: Default::default(),
        priority,
        webhook_url: None,
        webhook_secret: None,
        tenant_id: None,
    }
}

#[tokio::test]
async fn test_higher_priority_runs_first() {
    let mut config = test_config();
    config.queue.defaults.concurrency = 1;
    let app = TestApp::with_config(config).await;
    let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
    let jobs = app.pipeline.jobs();

    app.pipeline.queue().pause(&kind).await.unwrap();
    let low = jobs.create_job(request("low.png", JobPriority::Low)).await.unwrap();
    let high = jobs.create_job(request("high.png", JobPriority::High)).await.unwrap();
    app.pipeline.queue().resume(&kind).await.unwrap();

    let low = tokio::time::timeout(WAIT, jobs.wait_terminal(low.id)).await.unwrap().unwrap();
    let high = tokio::time::timeout(WAIT, jobs.wait_terminal(high.id)).await.unwrap().unwrap();
    assert_eq!(low.status, JobStatus::Completed);
    assert!(high.started_at <= low.started_at);
    app.shutdown().await;
}

#[tokio::test]
async fn test_completed_items_are_cleaned() {
    let app = TestApp::new().await;
    let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
    let job = app
        .pipeline
        .jobs()
        .create_job(request("clean.png", JobPriority::Normal))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, app.pipeline.jobs().wait_terminal(job.id))
        .await
        .unwrap()
        .unwrap();

    let queue = app.pipeline.queue();
    let waited = tokio::time::timeout(WAIT, async {
        while queue.stats(&kind).await.unwrap().completed < 1 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok());

    let removed = queue
        .clean(&kind, ItemState::Completed, chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(queue.stats(&kind).await.unwrap().completed, 0);
    app.shutdown().await;
}

#[tokio::test]
async fn test_unknown_kind_enqueue_fails() {
    let app = TestApp::new().await;
    let err = app
        .pipeline
        .queue()
        .enqueue(
            &OperationKind::new("hologram-render"),
            serde_json::json!({}),
            EnqueueOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(err.has_code(mediaflow_core::error::codes::UNKNOWN_KIND));
    app.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_leasing() {
    let app = TestApp::new().await;
    app.pipeline.shutdown().await.unwrap();
    assert!(app.pipeline.queue().is_closed());
    assert!(!app.pipeline.is_running().await);
}
