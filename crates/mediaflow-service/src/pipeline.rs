//! Wires the queue, services, worker pools and maintenance tasks together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use mediaflow_core::config::AppConfig;
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::traits::transform::Transform;
use mediaflow_database::{BatchRepository, JobRepository, UploadSessionRepository};
use mediaflow_realtime::{EventBus, HttpWebhookSender, WebhookNotifier, WebhookSender};
use mediaflow_storage::{UploadSessionManager, build_artifact_store};
use mediaflow_worker::jobs::{QueueCleanTask, UploadSweepTask};
use mediaflow_worker::{HandlerRegistry, KindSettings, MaintenanceScheduler, QueueRegistry, WorkerPool};

use crate::batch::{BatchCoordinator, BatchFanOutHandler};
use crate::job::{JobService, TransformJobHandler};
use crate::upload::UploadEventObserver;

/// Collects the collaborators a [`Pipeline`] is built from.
pub struct PipelineBuilder {
    config: AppConfig,
    store: Option<Arc<dyn ArtifactStore>>,
    sender: Option<Arc<dyn WebhookSender>>,
    transforms: Vec<Arc<dyn Transform>>,
    maintenance: bool,
}

impl PipelineBuilder {
    /// Start from a configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            sender: None,
            transforms: Vec::new(),
            maintenance: true,
        }
    }

    /// Use `store` instead of the provider named in the configuration.
    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `sender` instead of the HTTP sender.
    pub fn webhook_sender(mut self, sender: Arc<dyn WebhookSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Register a transform for its operation kind.
    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Enable or disable the cron maintenance tasks.
    pub fn maintenance(mut self, enabled: bool) -> Self {
        self.maintenance = enabled;
        self
    }

    /// Build every component. Nothing runs until [`Pipeline::start`].
    pub async fn build(self) -> AppResult<Pipeline> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => build_artifact_store(&config.storage).await?,
        };
        let sender: Arc<dyn WebhookSender> = match self.sender {
            Some(sender) => sender,
            None => Arc::new(HttpWebhookSender::new(&config.webhook)?),
        };

        let queue = Arc::new(QueueRegistry::from_config(&config.queue).await);
        for transform in &self.transforms {
            let kind = transform.kind();
            if !queue.has_kind(&kind) {
                let settings = KindSettings::from(&config.queue.kind_settings(&kind));
                queue.register_kind(kind, settings).await;
            }
        }

        let bus = Arc::new(EventBus::new(config.realtime.channel_buffer_size));
        let notifier = Arc::new(WebhookNotifier::new(sender, config.webhook.enabled));

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
            Arc::clone(&notifier),
            config.batch.clone(),
        ));
        let uploads = Arc::new(
            UploadSessionManager::new(
                Arc::clone(&store),
                Arc::new(UploadSessionRepository::new("upload_sessions")),
                config.upload.clone(),
            )
            .with_observer(Arc::new(UploadEventObserver::new(
                Arc::clone(&bus),
                Arc::clone(&notifier),
            ))),
        );

        let mut handlers = HandlerRegistry::new();
        for transform in self.transforms {
            handlers.register(Arc::new(TransformJobHandler::new(
                Arc::clone(&jobs),
                transform,
            )));
        }
        handlers.register(Arc::new(BatchFanOutHandler::new(Arc::clone(&batches))));

        tracing::info!(
            kinds = queue.kinds().len(),
            handlers = handlers.registered_kinds().len(),
            store = store.provider_type(),
            "Pipeline built"
        );

        Ok(Pipeline {
            config,
            store,
            queue,
            bus,
            notifier,
            jobs,
            batches,
            uploads,
            handlers: Arc::new(handlers),
            maintenance: self.maintenance,
            running: Mutex::new(None),
        })
    }
}

struct Running {
    cancel: watch::Sender<bool>,
    pools: Vec<JoinHandle<()>>,
    scheduler: Option<MaintenanceScheduler>,
}

/// The assembled media pipeline.
pub struct Pipeline {
    config: AppConfig,
    store: Arc<dyn ArtifactStore>,
    queue: Arc<QueueRegistry>,
    bus: Arc<EventBus>,
    notifier: Arc<WebhookNotifier>,
    jobs: Arc<JobService>,
    batches: Arc<BatchCoordinator>,
    uploads: Arc<UploadSessionManager>,
    handlers: Arc<HandlerRegistry>,
    maintenance: bool,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("kinds", &self.queue.kinds())
            .field("handlers", &self.handlers.registered_kinds())
            .finish()
    }
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder(config: AppConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Spawn the worker pools and the maintenance scheduler.
    ///
    /// Calling `start` on a running pipeline does nothing.
    pub async fn start(&self) -> AppResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let pools = WorkerPool::spawn_all(
            Arc::clone(&self.queue),
            Arc::clone(&self.handlers),
            &self.config.queue,
            cancel_rx,
        )
        .await?;

        let scheduler = if self.maintenance {
            let scheduler = MaintenanceScheduler::new().await?;
            scheduler
                .register(Arc::new(QueueCleanTask::new(
                    Arc::clone(&self.queue),
                    &self.config.queue,
                )))
                .await?;
            scheduler
                .register(Arc::new(UploadSweepTask::new(
                    Arc::clone(&self.uploads),
                    self.config.upload.sweep_schedule.clone(),
                )))
                .await?;
            scheduler.start().await?;
            Some(scheduler)
        } else {
            None
        };

        tracing::info!(pools = pools.len(), "Pipeline started");
        *running = Some(Running {
            cancel,
            pools,
            scheduler,
        });
        Ok(())
    }

    /// Stop accepting work, let in-flight items finish and stop the pools.
    pub async fn shutdown(&self) -> AppResult<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        tracing::info!("Pipeline shutting down");

        self.queue.close();
        let _ = running.cancel.send(true);
        for pool in running.pools {
            if let Err(e) = pool.await {
                tracing::error!(error = %e, "Worker pool task panicked");
            }
        }

        let timeout = Duration::from_secs(self.config.queue.shutdown_timeout_seconds);
        if !self.queue.drain(timeout).await {
            tracing::warn!("Queue still had leased items at shutdown");
        }

        if let Some(scheduler) = running.scheduler.as_mut() {
            scheduler.shutdown().await?;
        }
        tracing::info!("Pipeline stopped");
        Ok(())
    }

    /// Whether [`start`](Self::start) ran and [`shutdown`](Self::shutdown) did not.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<QueueRegistry> {
        &self.queue
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn notifier(&self) -> &Arc<WebhookNotifier> {
        &self.notifier
    }

    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    pub fn batches(&self) -> &Arc<BatchCoordinator> {
        &self.batches
    }

    pub fn uploads(&self) -> &Arc<UploadSessionManager> {
        &self.uploads
    }
}
