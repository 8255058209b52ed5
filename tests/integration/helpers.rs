//! Shared test helpers for integration tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use mediaflow_core::config::AppConfig;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::traits::transform::{ProgressReporter, Transform, TransformError};
use mediaflow_core::types::{ArtifactRef, OperationKind, TransformOutput, TransformParams};
use mediaflow_realtime::RecordingWebhookSender;
use mediaflow_service::Pipeline;
use mediaflow_storage::MemoryArtifactStore;

/// Wait budget for anything that goes through the worker pools.
pub const WAIT: Duration = Duration::from_secs(10);

/// Image transform whose behavior is driven by the input name:
/// `broken` fails permanently, `flaky` fails once transiently,
/// `slow` waits until released.
pub struct FakeImageTransform {
    calls: AtomicU32,
    flaky_seen: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<TransformError>>,
    release: tokio::sync::Notify,
}

impl FakeImageTransform {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            flaky_seen: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            release: tokio::sync::Notify::new(),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail every call with `error`, `count` times.
    pub async fn fail_next(&self, error: TransformError, count: usize) {
        let mut failures = self.failures.lock().await;
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Let every `slow` input finish.
    pub fn release_slow(&self) {
        self.release.notify_waiters();
    }
}

#[async_trait]
impl Transform for FakeImageTransform {
    fn kind(&self) -> OperationKind {
        OperationKind::new(OperationKind::IMAGE_RESIZE)
    }

    async fn transform(
        &self,
        input: &ArtifactRef,
        _params: &TransformParams,
        reporter: ProgressReporter,
    ) -> Result<TransformOutput, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        let name = input.as_str().to_string();
        if name.contains("broken") {
            return Err(TransformError::permanent(format!("unsupported image {name}")));
        }
        if name.contains("flaky") {
            let mut seen = self.flaky_seen.lock().await;
            if !seen.contains(&name) {
                seen.push(name.clone());
                return Err(TransformError::transient("temporary decoder error"));
            }
        }
        reporter.report(25);
        if name.contains("slow") {
            self.release.notified().await;
        }
        reporter.report(50);
        reporter.report(100);
        Ok(TransformOutput {
            location: ArtifactRef::new(format!("outputs/{name}.webp")),
            size_bytes: 2048,
            format: "webp".to_string(),
        })
    }
}

/// Test application context
pub struct TestApp {
    pub pipeline: Pipeline,
    pub transform: Arc<FakeImageTransform>,
    pub webhooks: Arc<RecordingWebhookSender>,
    pub store: Arc<MemoryArtifactStore>,
}

impl TestApp {
    /// A started pipeline with fast retries.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let transform = Arc::new(FakeImageTransform::new());
        let webhooks = Arc::new(RecordingWebhookSender::new());
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = Pipeline::builder(config)
            .artifact_store(Arc::clone(&store) as Arc<dyn ArtifactStore>)
            .webhook_sender(webhooks.clone())
            .transform(transform.clone())
            .maintenance(false)
            .build()
            .await
            .expect("Failed to build pipeline");
        pipeline.start().await.expect("Failed to start pipeline");
        Self {
            pipeline,
            transform,
            webhooks,
            store,
        }
    }

    /// Wait until `id` received `count` webhooks, then make sure no more arrive.
    pub async fn expect_webhooks(&self, id: &str, count: usize) -> Vec<mediaflow_realtime::WebhookPayload> {
        let waited = tokio::time::timeout(WAIT, async {
            while self.webhooks.deliveries_for(id).len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for webhooks to {id}");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = self.webhooks.deliveries_for(id);
        assert_eq!(sent.len(), count, "unexpected webhook count for {id}");
        sent
    }

    /// Read an artifact from the test store.
    pub async fn store_get(&self, artifact: &ArtifactRef) -> bytes::Bytes {
        self.store.get(artifact).await.expect("artifact missing")
    }

    pub async fn shutdown(self) {
        self.pipeline.shutdown().await.expect("Failed to shut down");
    }
}

/// Default configuration with millisecond polling and backoff.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.provider = "memory".to_string();
    config.queue.poll_interval_ms = 10;
    config.queue.shutdown_timeout_seconds = 2;
    config.queue.defaults.retry_delay_ms = 10;
    config.queue.defaults.max_retry_delay_ms = 50;
    config
}
