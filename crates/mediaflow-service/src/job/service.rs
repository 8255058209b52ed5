//! Job state machine service: every write to a job goes through here.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, watch};
use validator::Validate;

use mediaflow_core::error::{AppError, codes};
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::repository::Repository;
use mediaflow_core::types::{ArtifactRef, JobId, OperationKind, QueueItemId, TransformOutput, TransformParams};
use mediaflow_entity::WebhookTarget;
use mediaflow_entity::batch::Batch;
use mediaflow_entity::job::{Job, JobError, JobPriority, JobStatus, NewJob, ProgressOutcome};
use mediaflow_realtime::{EventBus, PipelineEvent, Subscription, Topic, WebhookNotifier, WebhookPayload};
use mediaflow_worker::{EnqueueOptions, QueueRegistry};

/// Request to create a standalone job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    /// Input artifact location.
    #[validate(length(min = 1, message = "Input artifact must not be empty"))]
    pub input: String,
    /// Operation to run.
    pub kind: OperationKind,
    /// Parameters handed to the transform.
    #[serde(default)]
    pub params: TransformParams,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: JobPriority,
    /// Callback URL for the terminal state.
    #[validate(url(message = "Webhook URL must be a valid URL"))]
    pub webhook_url: Option<String>,
    /// Shared secret for the callback.
    pub webhook_secret: Option<String>,
    /// Tenant or group.
    pub tenant_id: Option<String>,
}

/// Per-job serialization point and snapshot channel.
#[derive(Debug)]
struct JobCell {
    job: Mutex<Job>,
    snapshots: watch::Sender<Job>,
}

impl JobCell {
    fn new(job: Job) -> Self {
        let (snapshots, _) = watch::channel(job.clone());
        Self {
            job: Mutex::new(job),
            snapshots,
        }
    }
}

/// Applies job transitions atomically per job.
///
/// A transition runs under the job's lock: it is applied to a copy,
/// persisted, pushed to watchers and published on the job topic before the
/// lock is released, so observers see each job's states in order.
pub struct JobService {
    repo: Arc<dyn Repository<Job>>,
    queue: Arc<QueueRegistry>,
    bus: Arc<EventBus>,
    notifier: Arc<WebhookNotifier>,
    cells: DashMap<JobId, Arc<JobCell>>,
    dispatch: DashMap<JobId, QueueItemId>,
    /// Delivery currently running each job's transform.
    live: DashMap<JobId, u64>,
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService")
            .field("live_jobs", &self.cells.len())
            .field("dispatched", &self.dispatch.len())
            .field("running", &self.live.len())
            .finish()
    }
}

impl JobService {
    /// Creates a new job service.
    pub fn new(
        repo: Arc<dyn Repository<Job>>,
        queue: Arc<QueueRegistry>,
        bus: Arc<EventBus>,
        notifier: Arc<WebhookNotifier>,
    ) -> Self {
        Self {
            repo,
            queue,
            bus,
            notifier,
            cells: DashMap::new(),
            dispatch: DashMap::new(),
            live: DashMap::new(),
        }
    }

    /// Validates, persists and enqueues a standalone job.
    pub async fn create_job(&self, req: CreateJobRequest) -> AppResult<Job> {
        req.validate()?;
        self.ensure_transform_kind(&req.kind)?;

        let webhook = req.webhook_url.map(|url| WebhookTarget {
            url,
            secret: req.webhook_secret,
        });
        let job = Job::new(
            NewJob {
                batch_id: None,
                input: ArtifactRef::new(req.input),
                kind: req.kind,
                params: req.params,
                priority: req.priority,
                webhook,
                tenant_id: req.tenant_id,
            },
            Utc::now(),
        );
        let job = self.insert(job).await?;
        self.submit(job.id).await?;

        tracing::info!(job_id = %job.id, kind = %job.kind, "Created job");
        Ok(job)
    }

    /// Persists a pending member job of `batch`. It is not enqueued.
    pub async fn create_member(&self, batch: &Batch, input: ArtifactRef) -> AppResult<Job> {
        let job = Job::new(
            NewJob {
                batch_id: Some(batch.id),
                input,
                kind: batch.kind.clone(),
                params: batch.params.clone(),
                priority: JobPriority::Normal,
                webhook: None,
                tenant_id: batch.tenant_id.clone(),
            },
            Utc::now(),
        );
        self.insert(job).await
    }

    /// Enqueues a pending job on its kind's queue.
    pub async fn submit(&self, job_id: JobId) -> AppResult<QueueItemId> {
        let job = self.get(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(AppError::conflict(format!(
                "Job {job_id} cannot be submitted from status '{}'",
                job.status
            )));
        }

        let item_id = self
            .queue
            .enqueue(
                &job.kind,
                serde_json::json!({ "jobId": job.id }),
                EnqueueOptions::with_priority(job.priority.numeric_priority()),
            )
            .await?;
        self.dispatch.insert(job_id, item_id);

        tracing::debug!(job_id = %job_id, item_id = %item_id, kind = %job.kind, "Submitted job");
        Ok(item_id)
    }

    /// Starts a fresh processing phase owned by `delivery`.
    ///
    /// Fails with `ATTEMPT_IN_PROGRESS` while another delivery of the same
    /// job has not called [`end_attempt`](Self::end_attempt). From here on
    /// only writes carrying `delivery` are accepted.
    pub async fn begin_attempt(&self, job_id: JobId, delivery: u64) -> AppResult<Job> {
        self.commit(job_id, |job| {
            job.begin_attempt(delivery, Utc::now())?;
            let running = self.live.get(&job_id).map(|entry| *entry.value());
            if let Some(running) = running.filter(|owner| *owner != delivery) {
                return Err(AppError::conflict(format!(
                    "Job {job_id} is still being processed by delivery {running}"
                ))
                .with_code(codes::ATTEMPT_IN_PROGRESS));
            }
            self.live.insert(job_id, delivery);
            Ok(())
        })
        .await
    }

    /// Releases the job once `delivery`'s transform has returned.
    pub fn end_attempt(&self, job_id: JobId, delivery: u64) {
        self.live.remove_if(&job_id, |_, owner| *owner == delivery);
    }

    /// Records a progress report. Only applied reports are persisted.
    pub async fn report_progress(
        &self,
        job_id: JobId,
        delivery: u64,
        percent: u32,
    ) -> AppResult<ProgressOutcome> {
        let cell = self.cell(job_id).await?;
        let mut guard = cell.job.lock().await;
        let mut next = guard.clone();
        next.ensure_delivery(delivery)?;
        let outcome = next.apply_progress(percent, Utc::now())?;
        if outcome == ProgressOutcome::Applied {
            self.store(&cell, &mut guard, next).await?;
        } else {
            tracing::trace!(job_id = %job_id, percent, ?outcome, "Progress report not applied");
        }
        Ok(outcome)
    }

    /// Records the result of `delivery`'s transform.
    pub async fn complete(
        &self,
        job_id: JobId,
        delivery: u64,
        output: TransformOutput,
    ) -> AppResult<Job> {
        self.commit(job_id, |job| {
            job.ensure_delivery(delivery)?;
            job.complete(output, Utc::now())
        })
        .await
    }

    /// Records the final failure of `delivery`'s transform.
    pub async fn fail_attempt(
        &self,
        job_id: JobId,
        delivery: u64,
        error: JobError,
    ) -> AppResult<Job> {
        self.commit(job_id, |job| {
            job.ensure_delivery(delivery)?;
            job.fail(error, Utc::now())
        })
        .await
    }

    /// Fails the job whoever owns it. Used when the queue gives up on it.
    pub async fn fail(&self, job_id: JobId, error: JobError) -> AppResult<Job> {
        self.commit(job_id, |job| job.fail(error, Utc::now())).await
    }

    /// Re-runs the failed standalone jobs of `kind`.
    ///
    /// Each job goes back to `pending` before its queue item is revived.
    /// Failed batch members stay failed since their batch already counted
    /// them.
    pub async fn retry_failed(&self, kind: &OperationKind) -> AppResult<usize> {
        self.ensure_transform_kind(kind)?;
        let mut retried = 0;
        for dead in self.queue.failed_items(kind).await? {
            let Some(job_id) = dead
                .payload
                .get("jobId")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<JobId>().ok())
            else {
                tracing::warn!(item_id = %dead.id, "Failed item carries no job id, leaving it");
                continue;
            };
            let job = match self.get(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Skipping retry of unknown job");
                    continue;
                }
            };
            if job.is_member() || job.status != JobStatus::Failed {
                continue;
            }

            self.commit(job_id, |job| job.reopen(Utc::now())).await?;
            if self.queue.retry_item(kind, dead.id).await? {
                self.dispatch.insert(job_id, dead.id);
                retried += 1;
            }
        }

        tracing::info!(kind = %kind, retried, "Retried failed jobs");
        Ok(retried)
    }

    /// Cancels a standalone job.
    pub async fn cancel(&self, job_id: JobId) -> AppResult<Job> {
        let job = self.get(job_id).await?;
        if job.is_member() {
            return Err(AppError::conflict(format!(
                "Job {job_id} belongs to a batch; cancel the batch instead"
            ))
            .with_code(codes::MEMBER_JOB));
        }
        self.cancel_member(job_id).await
    }

    /// Cancels a job regardless of batch membership.
    pub async fn cancel_member(&self, job_id: JobId) -> AppResult<Job> {
        let job = self.commit(job_id, |job| job.cancel(Utc::now())).await?;
        tracing::info!(job_id = %job_id, "Cancelled job");
        Ok(job)
    }

    /// Returns the current job.
    pub async fn get(&self, job_id: JobId) -> AppResult<Job> {
        if let Some(cell) = self.cells.get(&job_id).map(|c| Arc::clone(c.value())) {
            return Ok(cell.snapshots.borrow().clone());
        }
        self.repo
            .find_by_id(&job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }

    /// Returns every job in `status`, oldest first.
    pub async fn list_by_status(&self, status: JobStatus) -> AppResult<Vec<Job>> {
        let mut jobs = self.repo.find_by_status(status).await?;
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Watches snapshots of one job.
    pub async fn watch(&self, job_id: JobId) -> AppResult<watch::Receiver<Job>> {
        Ok(self.cell(job_id).await?.snapshots.subscribe())
    }

    /// Waits until the job reaches a terminal status.
    pub async fn wait_terminal(&self, job_id: JobId) -> AppResult<Job> {
        let mut rx = self.watch(job_id).await?;
        let job = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map_err(|_| AppError::internal(format!("Job {job_id} watch closed")))?
            .clone();
        Ok(job)
    }

    /// Subscribes to the job's events. Ends immediately for finished jobs.
    pub async fn subscribe(&self, job_id: JobId) -> AppResult<Subscription> {
        let cell = self.cell(job_id).await?;
        let guard = cell.job.lock().await;
        let topic = Topic::Job(job_id);
        let subscription = self.bus.subscribe(topic.clone());
        if guard.status.is_terminal() {
            self.bus.close_topic(&topic);
            self.cells.remove(&job_id);
        }
        Ok(subscription)
    }

    /// Kinds a job may be created for.
    fn ensure_transform_kind(&self, kind: &OperationKind) -> AppResult<()> {
        if kind.is_batch() || !self.queue.has_kind(kind) {
            return Err(AppError::not_found(format!("Operation kind '{kind}' is not registered"))
                .with_code(codes::UNKNOWN_KIND));
        }
        Ok(())
    }

    async fn insert(&self, job: Job) -> AppResult<Job> {
        let job = self.repo.create(&job).await?;
        self.cells.insert(job.id, Arc::new(JobCell::new(job.clone())));
        Ok(job)
    }

    async fn cell(&self, job_id: JobId) -> AppResult<Arc<JobCell>> {
        if let Some(cell) = self.cells.get(&job_id) {
            return Ok(Arc::clone(cell.value()));
        }
        let job = self
            .repo
            .find_by_id(&job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))?;
        Ok(Arc::clone(
            self.cells
                .entry(job_id)
                .or_insert_with(|| Arc::new(JobCell::new(job)))
                .value(),
        ))
    }

    /// Applies `transition` to a copy of the job and stores it.
    async fn commit(
        &self,
        job_id: JobId,
        transition: impl FnOnce(&mut Job) -> AppResult<()>,
    ) -> AppResult<Job> {
        let cell = self.cell(job_id).await?;
        let mut guard = cell.job.lock().await;
        let mut next = guard.clone();
        transition(&mut next)?;
        self.store(&cell, &mut guard, next).await
    }

    /// Persists, broadcasts and publishes `next` while the lock is held.
    async fn store(
        &self,
        cell: &JobCell,
        guard: &mut MutexGuard<'_, Job>,
        next: Job,
    ) -> AppResult<Job> {
        let was_terminal = guard.status.is_terminal();
        let stored = self.repo.update(&next).await?;
        **guard = stored.clone();
        cell.snapshots.send_replace(stored.clone());

        let topic = Topic::Job(stored.id);
        self.bus.publish(&topic, PipelineEvent::job(&stored));

        if stored.status.is_terminal() && !was_terminal {
            self.finish(&stored).await;
            self.bus.close_topic(&topic);
        }
        Ok(stored)
    }

    /// One-time work when a job becomes terminal.
    async fn finish(&self, job: &Job) {
        self.cells.remove(&job.id);
        let dispatched = self.dispatch.remove(&job.id).map(|(_, item)| item);

        if job.status == JobStatus::Cancelled {
            if let Some(item_id) = dispatched {
                match self.queue.remove(&job.kind, item_id).await {
                    Ok(true) => tracing::debug!(job_id = %job.id, item_id = %item_id, "Removed queued item"),
                    Ok(false) => tracing::debug!(job_id = %job.id, "Queue item already leased, late result will be discarded"),
                    Err(e) => tracing::debug!(job_id = %job.id, error = %e, "Queue item already gone"),
                }
            }
        }

        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            attempts = job.attempts,
            "Job finished"
        );

        if !job.is_member() {
            self.notifier
                .spawn_notify(job.webhook.clone(), WebhookPayload::from_job(job));
        }
    }
}
