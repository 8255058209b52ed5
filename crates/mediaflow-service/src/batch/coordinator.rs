//! Batch coordinator: membership, fan-out in groups, aggregation and cancel.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use mediaflow_core::config::batch::BatchConfig;
use mediaflow_core::error::{AppError, ErrorKind, codes};
use mediaflow_core::traits::transform::TransformError;
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::repository::Repository;
use mediaflow_core::types::{ArtifactRef, BatchId, JobId, OperationKind, QueueItemId, TransformParams};
use mediaflow_entity::WebhookTarget;
use mediaflow_entity::batch::{Batch, BatchMember, BatchStatus, MemberOutcome, MemberUpdate, NewBatch};
use mediaflow_entity::job::{Job, JobStatus};
use mediaflow_realtime::{EventBus, PipelineEvent, Subscription, Topic, WebhookNotifier, WebhookPayload};
use mediaflow_worker::{EnqueueOptions, QueueRegistry};

use crate::job::JobService;

/// Request to create a batch.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    /// Display name.
    #[validate(length(min = 1, max = 255, message = "Batch name must be 1-255 characters"))]
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Tenant or group.
    pub tenant_id: Option<String>,
    /// Operation applied to every file.
    pub kind: OperationKind,
    /// Parameters applied to every file.
    #[serde(default)]
    pub params: TransformParams,
    /// Files submitted together during fan-out.
    #[validate(range(min = 1, message = "Group size must be at least 1"))]
    pub group_size: Option<usize>,
    /// Callback URL.
    #[validate(url(message = "Webhook URL must be a valid URL"))]
    pub webhook_url: Option<String>,
    /// Shared secret for the callback.
    pub webhook_secret: Option<String>,
}

/// One file added to a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFile {
    /// Input artifact.
    pub input: ArtifactRef,
    /// Original file name.
    pub filename: Option<String>,
}

impl BatchFile {
    /// A file without a display name.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: ArtifactRef::new(input),
            filename: None,
        }
    }

    /// Attach the original file name.
    pub fn named(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Per-tenant batch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    /// All batches.
    pub total_batches: usize,
    /// Pending batches.
    pub pending: usize,
    /// Processing batches.
    pub processing: usize,
    /// Completed batches.
    pub completed: usize,
    /// Cancelled batches.
    pub cancelled: usize,
    /// Files across all batches.
    pub total_files: usize,
    /// Completed files.
    pub processed_files: usize,
    /// Failed files.
    pub failed_files: usize,
}

/// Coordinates batches and their member jobs.
pub struct BatchCoordinator {
    repo: Arc<dyn Repository<Batch>>,
    jobs: Arc<JobService>,
    queue: Arc<QueueRegistry>,
    bus: Arc<EventBus>,
    notifier: Arc<WebhookNotifier>,
    config: BatchConfig,
    cells: DashMap<BatchId, Arc<Mutex<Batch>>>,
    tokens: DashMap<BatchId, CancellationToken>,
    dispatch: DashMap<BatchId, QueueItemId>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("live_batches", &self.cells.len())
            .field("group_size", &self.config.group_size)
            .finish()
    }
}

impl BatchCoordinator {
    /// Creates a new coordinator.
    pub fn new(
        repo: Arc<dyn Repository<Batch>>,
        jobs: Arc<JobService>,
        queue: Arc<QueueRegistry>,
        bus: Arc<EventBus>,
        notifier: Arc<WebhookNotifier>,
        config: BatchConfig,
    ) -> Self {
        Self {
            repo,
            jobs,
            queue,
            bus,
            notifier,
            config,
            cells: DashMap::new(),
            tokens: DashMap::new(),
            dispatch: DashMap::new(),
        }
    }

    /// Creates an empty pending batch.
    pub async fn create_batch(&self, req: CreateBatchRequest) -> AppResult<Batch> {
        req.validate()?;
        if req.kind.is_batch() || !self.queue.has_kind(&req.kind) {
            return Err(AppError::not_found(format!(
                "Operation kind '{}' is not registered",
                req.kind
            ))
            .with_code(codes::UNKNOWN_KIND));
        }

        let webhook = req.webhook_url.map(|url| WebhookTarget {
            url,
            secret: req.webhook_secret,
        });
        let batch = Batch::new(
            NewBatch {
                name: req.name,
                description: req.description,
                tenant_id: req.tenant_id,
                kind: req.kind,
                params: req.params,
                group_size: req.group_size.unwrap_or(self.config.group_size),
                webhook,
            },
            Utc::now(),
        );
        let batch = self.repo.create(&batch).await?;
        self.cells
            .insert(batch.id, Arc::new(Mutex::new(batch.clone())));

        tracing::info!(
            batch_id = %batch.id,
            kind = %batch.kind,
            group_size = batch.group_size,
            "Created batch"
        );
        Ok(batch)
    }

    /// Appends files as pending member jobs. Only legal while pending.
    pub async fn add_files(&self, batch_id: BatchId, files: Vec<BatchFile>) -> AppResult<Batch> {
        if files.is_empty() {
            return Err(AppError::validation("At least one file is required"));
        }

        let cell = self.cell(batch_id).await?;
        let mut guard = cell.lock().await;
        guard.ensure_accepts_files()?;

        let mut members = Vec::with_capacity(files.len());
        for file in files {
            let job = self.jobs.create_member(&guard, file.input).await?;
            members.push(BatchMember::from_job(&job, file.filename));
        }

        let mut next = guard.clone();
        next.add_members(members, Utc::now())?;
        let batch = self.store(&mut guard, next).await?;

        tracing::info!(batch_id = %batch_id, total_files = batch.total_files, "Added files to batch");
        Ok(batch)
    }

    /// Starts a pending batch and queues its fan-out.
    pub async fn start(&self, batch_id: BatchId) -> AppResult<Batch> {
        let cell = self.cell(batch_id).await?;
        let batch = {
            let mut guard = cell.lock().await;
            let mut next = guard.clone();
            next.start(Utc::now())?;
            self.store(&mut guard, next).await?
        };

        self.tokens.entry(batch_id).or_insert_with(CancellationToken::new);
        let item_id = self
            .queue
            .enqueue(
                &OperationKind::batch(),
                serde_json::json!({ "batchId": batch_id }),
                EnqueueOptions::default(),
            )
            .await?;
        self.dispatch.insert(batch_id, item_id);

        tracing::info!(batch_id = %batch_id, total_files = batch.total_files, "Started batch");
        Ok(batch)
    }

    /// Submits members group by group, waiting for each group to finish.
    ///
    /// Stops submitting once the batch is cancelled. Members that already
    /// reached a terminal status are skipped, so a redelivered fan-out
    /// resumes where the previous one stopped.
    pub async fn run_fan_out(&self, batch_id: BatchId) -> AppResult<Batch> {
        let snapshot = self.get(batch_id).await?;
        if snapshot.status != BatchStatus::Processing {
            tracing::info!(batch_id = %batch_id, status = %snapshot.status, "Batch not processing, nothing to fan out");
            return Ok(snapshot);
        }
        let token = self
            .tokens
            .entry(batch_id)
            .or_insert_with(CancellationToken::new)
            .clone();
        let group_size = snapshot.group_size.max(1);

        for (index, group) in snapshot.members.chunks(group_size).enumerate() {
            if token.is_cancelled() || self.get(batch_id).await?.status != BatchStatus::Processing {
                break;
            }
            let mut trackers = Vec::with_capacity(group.len());
            for member in group.iter().filter(|m| !m.status.is_terminal()) {
                let updates = self.jobs.watch(member.job_id).await?;
                let pending = updates.borrow().status == JobStatus::Pending;
                if pending {
                    if let Err(e) = self.jobs.submit(member.job_id).await {
                        if e.kind == ErrorKind::ServiceUnavailable {
                            return Err(e);
                        }
                        tracing::warn!(
                            batch_id = %batch_id,
                            job_id = %member.job_id,
                            error = %e,
                            "Member could not be queued, failing it"
                        );
                        let error = TransformError::permanent(format!("Could not be queued: {}", e.message));
                        match self.jobs.fail(member.job_id, error.into()).await {
                            Ok(_) => {}
                            Err(e) if e.has_code(codes::JOB_TERMINAL) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                trackers.push(self.track_member(batch_id, updates, token.clone()));
            }
            tracing::debug!(batch_id = %batch_id, group = index, size = trackers.len(), "Waiting for group");
            join_all(trackers).await;
        }

        self.dispatch.remove(&batch_id);
        self.get(batch_id).await
    }

    /// Folds a member's snapshots into the batch until it is terminal.
    async fn track_member(
        &self,
        batch_id: BatchId,
        mut updates: watch::Receiver<Job>,
        token: CancellationToken,
    ) {
        loop {
            let job = updates.borrow_and_update().clone();
            if let Err(e) = self.apply_member(batch_id, &job).await {
                tracing::warn!(batch_id = %batch_id, job_id = %job.id, error = %e, "Failed to apply member update");
            }
            if job.status.is_terminal() {
                return;
            }
            tokio::select! {
                _ = token.cancelled() => return,
                changed = updates.changed() => {
                    if changed.is_err() {
                        let job = updates.borrow().clone();
                        if let Err(e) = self.apply_member(batch_id, &job).await {
                            tracing::warn!(batch_id = %batch_id, job_id = %job.id, error = %e, "Failed to apply member update");
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Applies one member snapshot to the aggregate.
    pub async fn apply_member(&self, batch_id: BatchId, job: &Job) -> AppResult<MemberOutcome> {
        let cell = self.cell(batch_id).await?;
        let mut guard = cell.lock().await;
        let mut next = guard.clone();
        let outcome = next.apply_member_update(&MemberUpdate::from(job), Utc::now());
        if outcome != MemberOutcome::Ignored {
            self.store(&mut guard, next).await?;
        }
        Ok(outcome)
    }

    /// Cancels the batch and every live member.
    ///
    /// Members are cancelled first under the batch lock. A member that
    /// already finished keeps its real status in the aggregate; if that
    /// finishes the whole batch, it completes and the cancel fails with
    /// `BATCH_TERMINAL`. Running transforms finish on their own and their
    /// results are discarded.
    pub async fn cancel(&self, batch_id: BatchId) -> AppResult<Batch> {
        let cell = self.cell(batch_id).await?;
        let (batch, cancelled) = {
            let mut guard = cell.lock().await;
            let mut next = guard.clone();
            next.ensure_cancellable()?;
            let now = Utc::now();

            let live: Vec<JobId> = next
                .members
                .iter()
                .filter(|m| !m.status.is_terminal())
                .map(|m| m.job_id)
                .collect();
            let mut cancelled = Vec::with_capacity(live.len());
            for job_id in live {
                match self.jobs.cancel_member(job_id).await {
                    Ok(_) => cancelled.push(job_id),
                    Err(e) if e.has_code(codes::JOB_TERMINAL) => {
                        let job = self.jobs.get(job_id).await?;
                        next.apply_member_update(&MemberUpdate::from(&job), now);
                    }
                    Err(e) => tracing::warn!(batch_id = %batch_id, job_id = %job_id, error = %e, "Failed to cancel member"),
                }
            }

            if let Err(e) = next.ensure_cancellable() {
                self.store(&mut guard, next).await?;
                return Err(e);
            }
            next.cancel(now)?;
            self.bus.publish(
                &Topic::Batch(batch_id),
                PipelineEvent::BatchCancelled {
                    batch_id,
                    cancelled_jobs: cancelled.clone(),
                    timestamp: next.updated_at,
                },
            );
            (self.store(&mut guard, next).await?, cancelled)
        };

        if let Some((_, token)) = self.tokens.remove(&batch_id) {
            token.cancel();
        }
        if let Some((_, item_id)) = self.dispatch.remove(&batch_id) {
            let _ = self.queue.remove(&OperationKind::batch(), item_id).await;
        }

        tracing::info!(batch_id = %batch_id, cancelled_members = cancelled.len(), "Cancelled batch");
        Ok(batch)
    }

    /// Returns the current batch.
    pub async fn get(&self, batch_id: BatchId) -> AppResult<Batch> {
        if let Some(cell) = self.cells.get(&batch_id).map(|c| Arc::clone(c.value())) {
            return Ok(cell.lock().await.clone());
        }
        self.load(batch_id).await
    }

    /// Pending and processing batches of a tenant, newest first.
    pub async fn list_active(&self, tenant_id: Option<&str>) -> AppResult<Vec<Batch>> {
        let mut batches = self.repo.find_by_status(BatchStatus::Pending).await?;
        batches.extend(self.repo.find_by_status(BatchStatus::Processing).await?);
        batches.retain(|b| b.tenant_id.as_deref() == tenant_id);
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(batches)
    }

    /// Counters over every batch of a tenant.
    pub async fn statistics(&self, tenant_id: Option<&str>) -> AppResult<BatchStatistics> {
        let mut stats = BatchStatistics::default();
        for status in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Cancelled,
        ] {
            let batches: Vec<Batch> = self
                .repo
                .find_by_status(status)
                .await?
                .into_iter()
                .filter(|b| b.tenant_id.as_deref() == tenant_id)
                .collect();
            let count = batches.len();
            match status {
                BatchStatus::Pending => stats.pending = count,
                BatchStatus::Processing => stats.processing = count,
                BatchStatus::Completed => stats.completed = count,
                BatchStatus::Cancelled => stats.cancelled = count,
            }
            stats.total_batches += count;
            for batch in &batches {
                stats.total_files += batch.total_files;
                stats.processed_files += batch.processed_files;
                stats.failed_files += batch.failed_files;
            }
        }
        Ok(stats)
    }

    /// Subscribes to the batch's events. Ends immediately for finished batches.
    pub async fn subscribe(&self, batch_id: BatchId) -> AppResult<Subscription> {
        let cell = self.cell(batch_id).await?;
        let guard = cell.lock().await;
        let topic = Topic::Batch(batch_id);
        let subscription = self.bus.subscribe(topic.clone());
        if guard.status.is_terminal() {
            self.bus.close_topic(&topic);
            self.cells.remove(&batch_id);
        }
        Ok(subscription)
    }

    /// Subscribes to every batch event of a tenant.
    pub fn subscribe_group(&self, tenant_id: &str) -> Subscription {
        self.bus.subscribe(Topic::Group(tenant_id.to_string()))
    }

    async fn load(&self, batch_id: BatchId) -> AppResult<Batch> {
        self.repo
            .find_by_id(&batch_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Batch {batch_id} not found")))
    }

    async fn cell(&self, batch_id: BatchId) -> AppResult<Arc<Mutex<Batch>>> {
        if let Some(cell) = self.cells.get(&batch_id) {
            return Ok(Arc::clone(cell.value()));
        }
        let batch = self.load(batch_id).await?;
        Ok(Arc::clone(
            self.cells
                .entry(batch_id)
                .or_insert_with(|| Arc::new(Mutex::new(batch)))
                .value(),
        ))
    }

    /// Persists and publishes `next` while the batch lock is held.
    async fn store(&self, guard: &mut MutexGuard<'_, Batch>, next: Batch) -> AppResult<Batch> {
        let was_terminal = guard.status.is_terminal();
        let stored = self.repo.update(&next).await?;
        **guard = stored.clone();

        let topic = Topic::Batch(stored.id);
        let event = PipelineEvent::batch(&stored);
        if let Some(tenant) = &stored.tenant_id {
            self.bus.publish(&Topic::Group(tenant.clone()), event.clone());
        }
        self.bus.publish(&topic, event);

        if stored.status.is_terminal() && !was_terminal {
            self.bus.close_topic(&topic);
            self.cells.remove(&stored.id);
            tracing::info!(
                batch_id = %stored.id,
                status = %stored.status,
                processed_files = stored.processed_files,
                failed_files = stored.failed_files,
                total_files = stored.total_files,
                "Batch finished"
            );
            self.notifier
                .spawn_notify(stored.webhook.clone(), WebhookPayload::from_batch(&stored));
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{Fixture, fixture, output, wait_for_deliveries};

    fn request(tenant: Option<&str>, group_size: Option<usize>) -> CreateBatchRequest {
        CreateBatchRequest {
            name: "holiday album".to_string(),
            description: None,
            tenant_id: tenant.map(str::to_string),
            kind: OperationKind::new(OperationKind::IMAGE_RESIZE),
            params: TransformParams::new(),
            group_size,
            webhook_url: Some("https://hooks.example.com/batches".to_string()),
            webhook_secret: None,
        }
    }

    fn files(names: &[&str]) -> Vec<BatchFile> {
        names
            .iter()
            .map(|n| BatchFile::new(format!("in/{n}")).named(*n))
            .collect()
    }

    async fn wait_waiting(fx: &Fixture, count: usize) {
        let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while fx.queue.stats(&kind).await.unwrap().waiting < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {count} queued members");
    }

    async fn lease_members(fx: &Fixture) -> Vec<JobId> {
        let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
        fx.queue
            .lease(&kind, 10)
            .await
            .unwrap()
            .iter()
            .map(|item| item.payload["jobId"].as_str().unwrap().parse().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected() {
        let fx = fixture().await;
        let mut req = request(None, None);
        req.kind = OperationKind::new("pdf-render");
        let err = fx.batches.create_batch(req).await.unwrap_err();
        assert!(err.has_code(codes::UNKNOWN_KIND));
    }

    #[tokio::test]
    async fn test_files_rejected_after_start() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, None)).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png", "b.png"]))
            .await
            .unwrap();
        assert_eq!(batch.total_files, 2);
        fx.batches.start(batch.id).await.unwrap();

        let err = fx
            .batches
            .add_files(batch.id, files(&["c.png"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.has_code(codes::BATCH_ALREADY_STARTED));
        assert_eq!(fx.batches.get(batch.id).await.unwrap().total_files, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_cannot_start() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, None)).await.unwrap();
        let err = fx.batches.start(batch.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        let err = fx.batches.add_files(batch.id, Vec::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_fan_out_runs_groups_in_order() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, Some(3))).await.unwrap();
        fx.batches
            .add_files(batch.id, files(&["a.png", "b.png", "broken.png", "d.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();

        let batches = Arc::clone(&fx.batches);
        let fan_out = tokio::spawn(async move { batches.run_fan_out(batch.id).await });

        wait_waiting(&fx, 3).await;
        let first = lease_members(&fx).await;
        assert_eq!(first.len(), 3);
        for job_id in &first {
            let job = fx.jobs.begin_attempt(*job_id, 1).await.unwrap();
            if job.input.as_str().contains("broken") {
                fx.jobs
                    .fail(*job_id, TransformError::permanent("corrupt").into())
                    .await
                    .unwrap();
            } else {
                fx.jobs.complete(*job_id, 1, output("out/ok.webp")).await.unwrap();
            }
        }

        wait_waiting(&fx, 1).await;
        let second = lease_members(&fx).await;
        assert_eq!(second.len(), 1);
        fx.jobs.begin_attempt(second[0], 1).await.unwrap();
        fx.jobs.complete(second[0], 1, output("out/d.webp")).await.unwrap();

        let finished = fan_out.await.unwrap().unwrap();
        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.processed_files, 3);
        assert_eq!(finished.failed_files, 1);
        assert_eq!(finished.total_files, 4);

        let id = batch.id.to_string();
        wait_for_deliveries(&fx.sender, &id, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = fx.sender.deliveries_for(&id);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].processed_files, Some(3));
        assert_eq!(sent[0].failed_files, Some(1));
        assert_eq!(sent[0].files.as_ref().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn test_member_updates_aggregate_progress() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, None)).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png", "b.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();
        let ids = batch.member_ids();

        let job = fx.jobs.begin_attempt(ids[0], 1).await.unwrap();
        fx.batches.apply_member(batch.id, &job).await.unwrap();
        fx.jobs.report_progress(ids[0], 1, 50).await.unwrap();
        let job = fx.jobs.get(ids[0]).await.unwrap();
        let outcome = fx.batches.apply_member(batch.id, &job).await.unwrap();
        assert_eq!(outcome, MemberOutcome::Applied);
        assert_eq!(fx.batches.get(batch.id).await.unwrap().progress, 25);

        let job = fx.jobs.complete(ids[0], 1, output("out/a.webp")).await.unwrap();
        fx.batches.apply_member(batch.id, &job).await.unwrap();
        fx.jobs.begin_attempt(ids[1], 1).await.unwrap();
        let job = fx.jobs.complete(ids[1], 1, output("out/b.webp")).await.unwrap();
        let outcome = fx.batches.apply_member(batch.id, &job).await.unwrap();
        assert_eq!(outcome, MemberOutcome::BatchCompleted);

        let again = fx.batches.apply_member(batch.id, &job).await.unwrap();
        assert_eq!(again, MemberOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_cancel_stops_members_and_publishes() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, Some(1))).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png", "b.png", "c.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();
        let mut sub = fx.batches.subscribe(batch.id).await.unwrap();

        let cancelled = fx.batches.cancel(batch.id).await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        for job_id in batch.member_ids() {
            assert_eq!(fx.jobs.get(job_id).await.unwrap().status, JobStatus::Cancelled);
        }

        let mut saw_cancelled = false;
        while let Some(event) = sub.recv().await {
            if let PipelineEvent::BatchCancelled { cancelled_jobs, .. } = event {
                assert_eq!(cancelled_jobs.len(), 3);
                saw_cancelled = true;
            }
        }
        assert!(saw_cancelled);

        let err = fx.batches.cancel(batch.id).await.unwrap_err();
        assert!(err.has_code(codes::BATCH_TERMINAL));

        let after = fx.batches.run_fan_out(batch.id).await.unwrap();
        assert_eq!(after.status, BatchStatus::Cancelled);
        let kind = OperationKind::new(OperationKind::IMAGE_RESIZE);
        assert_eq!(fx.queue.stats(&kind).await.unwrap().waiting, 0);
    }

    async fn cancelled_jobs(sub: &mut Subscription) -> Option<Vec<JobId>> {
        let mut seen = None;
        while let Some(event) = sub.recv().await {
            if let PipelineEvent::BatchCancelled { cancelled_jobs, .. } = event {
                seen = Some(cancelled_jobs);
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_cancel_keeps_members_that_already_finished() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, Some(2))).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png", "b.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();
        let ids = batch.member_ids();
        fx.jobs.begin_attempt(ids[0], 1).await.unwrap();
        fx.jobs.complete(ids[0], 1, output("out/a.webp")).await.unwrap();
        let mut sub = fx.batches.subscribe(batch.id).await.unwrap();

        let cancelled = fx.batches.cancel(batch.id).await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.processed_files, 1);
        assert_eq!(cancelled.members[0].status, JobStatus::Completed);
        assert_eq!(cancelled.members[1].status, JobStatus::Cancelled);
        assert_eq!(fx.jobs.get(ids[0]).await.unwrap().status, JobStatus::Completed);
        assert_eq!(fx.jobs.get(ids[1]).await.unwrap().status, JobStatus::Cancelled);
        assert_eq!(cancelled_jobs(&mut sub).await, Some(vec![ids[1]]));
    }

    #[tokio::test]
    async fn test_cancel_after_every_member_finished_completes_batch() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, None)).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png", "b.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();
        let ids = batch.member_ids();
        fx.jobs.begin_attempt(ids[0], 1).await.unwrap();
        fx.jobs.complete(ids[0], 1, output("out/a.webp")).await.unwrap();
        fx.jobs.begin_attempt(ids[1], 1).await.unwrap();
        fx.jobs
            .fail(ids[1], TransformError::permanent("corrupt").into())
            .await
            .unwrap();

        let err = fx.batches.cancel(batch.id).await.unwrap_err();
        assert!(err.has_code(codes::BATCH_TERMINAL));
        let stored = fx.batches.get(batch.id).await.unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
        assert_eq!(stored.processed_files, 1);
        assert_eq!(stored.failed_files, 1);

        let id = batch.id.to_string();
        wait_for_deliveries(&fx.sender, &id, 1).await;
        assert_eq!(fx.sender.deliveries_for(&id)[0].status, "completed");
    }

    #[tokio::test]
    async fn test_subscription_ends_with_the_batch() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, None)).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();
        let mut live = fx.batches.subscribe(batch.id).await.unwrap();

        let member = batch.member_ids()[0];
        fx.jobs.begin_attempt(member, 1).await.unwrap();
        let job = fx.jobs.complete(member, 1, output("out/a.webp")).await.unwrap();
        fx.batches.apply_member(batch.id, &job).await.unwrap();

        let mut last = None;
        while let Some(event) = live.recv().await {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(PipelineEvent::BatchProgress { status: BatchStatus::Completed, .. })
        ));

        let mut late = fx.batches.subscribe(batch.id).await.unwrap();
        assert!(late.recv().await.is_none());
        assert!(!fx.batches.cells.contains_key(&batch.id));
    }

    #[tokio::test]
    async fn test_member_that_cannot_be_queued_is_failed() {
        let fx = fixture().await;
        let orphan = Batch::new(
            NewBatch {
                name: "scans".to_string(),
                description: None,
                tenant_id: None,
                kind: OperationKind::new("pdf-render"),
                params: TransformParams::new(),
                group_size: 2,
                webhook: None,
            },
            Utc::now(),
        );
        fx.batches.repo.create(&orphan).await.unwrap();
        let batch = fx
            .batches
            .add_files(orphan.id, files(&["a.pdf"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();

        let finished = tokio::time::timeout(Duration::from_secs(5), fx.batches.run_fan_out(batch.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.failed_files, 1);
        let job = fx.jobs.get(batch.member_ids()[0]).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().message.starts_with("Could not be queued"));
    }

    #[tokio::test]
    async fn test_fan_out_on_closed_queue_is_retried_later() {
        let fx = fixture().await;
        let batch = fx.batches.create_batch(request(None, None)).await.unwrap();
        let batch = fx
            .batches
            .add_files(batch.id, files(&["a.png"]))
            .await
            .unwrap();
        fx.batches.start(batch.id).await.unwrap();
        fx.queue.close();

        let err = fx.batches.run_fan_out(batch.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        let member = fx.jobs.get(batch.member_ids()[0]).await.unwrap();
        assert_eq!(member.status, JobStatus::Pending);
        assert_eq!(fx.batches.get(batch.id).await.unwrap().status, BatchStatus::Processing);
    }

    #[tokio::test]
    async fn test_group_subscription_and_statistics() {
        let fx = fixture().await;
        let mut group = fx.batches.subscribe_group("acme");
        let batch = fx
            .batches
            .create_batch(request(Some("acme"), None))
            .await
            .unwrap();
        fx.batches
            .add_files(batch.id, files(&["a.png"]))
            .await
            .unwrap();

        match group.recv().await {
            Some(PipelineEvent::BatchProgress { batch_id, .. }) => assert_eq!(batch_id, batch.id),
            other => panic!("unexpected event {other:?}"),
        }

        let active = fx.batches.list_active(Some("acme")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(fx.batches.list_active(None).await.unwrap().is_empty());

        let stats = fx.batches.statistics(Some("acme")).await.unwrap();
        assert_eq!(stats.total_batches, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_files, 1);
    }
}
