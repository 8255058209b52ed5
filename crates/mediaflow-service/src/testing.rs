//! Fixtures shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use mediaflow_core::config::batch::BatchConfig;
use mediaflow_core::config::queue::QueueConfig;
use mediaflow_core::traits::transform::{ProgressReporter, Transform, TransformError};
use mediaflow_core::types::{ArtifactRef, OperationKind, TransformOutput, TransformParams};
use mediaflow_database::{BatchRepository, JobRepository};
use mediaflow_realtime::{EventBus, RecordingWebhookSender, WebhookNotifier};
use mediaflow_worker::QueueRegistry;

use crate::batch::BatchCoordinator;
use crate::job::JobService;

pub(crate) struct Fixture {
    pub queue: Arc<QueueRegistry>,
    pub bus: Arc<EventBus>,
    pub sender: Arc<RecordingWebhookSender>,
    pub jobs: Arc<JobService>,
    pub batches: Arc<BatchCoordinator>,
}

pub(crate) async fn fixture() -> Fixture {
    fixture_on(QueueRegistry::from_config(&QueueConfig::default()).await)
}

/// Services wired onto a caller-built queue.
pub(crate) fn fixture_on(queue: QueueRegistry) -> Fixture {
    let queue = Arc::new(queue);
    let bus = Arc::new(EventBus::new(64));
    let sender = Arc::new(RecordingWebhookSender::new());
    let notifier = Arc::new(WebhookNotifier::new(sender.clone(), true));
    let jobs = Arc::new(JobService::new(
        Arc::new(JobRepository::new("jobs")),
        Arc::clone(&queue),
        Arc::clone(&bus),
        Arc::clone(&notifier),
    ));
    let batches = Arc::new(BatchCoordinator::new(
        Arc::new(BatchRepository::new("batches")),
        Arc::clone(&jobs),
        Arc::clone(&queue),
        Arc::clone(&bus),
        notifier,
        BatchConfig::default(),
    ));
    Fixture {
        queue,
        bus,
        sender,
        jobs,
        batches,
    }
}

/// Wait until `id` received at least `count` callbacks.
pub(crate) async fn wait_for_deliveries(sender: &RecordingWebhookSender, id: &str, count: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while sender.deliveries_for(id).len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {count} webhook(s) to {id}");
}

pub(crate) fn output(location: &str) -> TransformOutput {
    TransformOutput {
        location: ArtifactRef::new(location),
        size_bytes: 1024,
        format: "webp".to_string(),
    }
}

/// Reports `steps` and succeeds, unless the input name contains "broken"
/// or a queued failure is pending.
pub(crate) struct ScriptedTransform {
    kind: OperationKind,
    steps: Vec<u32>,
    failures: Mutex<VecDeque<TransformError>>,
    calls: AtomicU32,
}

impl ScriptedTransform {
    pub fn new(kind: &str, steps: Vec<u32>) -> Self {
        Self {
            kind: OperationKind::new(kind),
            steps,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub async fn fail_next(&self, error: TransformError) {
        self.failures.lock().await.push_back(error);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for ScriptedTransform {
    fn kind(&self) -> OperationKind {
        self.kind.clone()
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
        if input.as_str().contains("broken") {
            return Err(TransformError::permanent(format!("cannot decode {input}")));
        }
        for step in &self.steps {
            reporter.report(*step);
            tokio::task::yield_now().await;
        }
        Ok(output(&format!("out/{input}")))
    }
}
