//! Batch entity model and aggregation rules.

use chrono::{DateTime, Utc};
use mediaflow_core::error::codes;
use mediaflow_core::traits::repository::Record;
use mediaflow_core::types::{ArtifactRef, BatchId, JobId, OperationKind, TransformOutput, TransformParams};
use mediaflow_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use super::status::BatchStatus;
use crate::job::{Job, JobError, JobStatus};
use crate::webhook::WebhookTarget;

/// Snapshot of one member job held by its batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMember {
    /// The member job.
    pub job_id: JobId,
    /// Input artifact.
    pub input: ArtifactRef,
    /// Original file name, when the caller provided one.
    pub filename: Option<String>,
    /// Last seen member status.
    pub status: JobStatus,
    /// Last seen member progress.
    pub progress: u8,
    /// Member result, when completed.
    pub result: Option<TransformOutput>,
    /// Member error, when failed.
    pub error: Option<JobError>,
}

impl BatchMember {
    /// Snapshot a freshly created member job.
    pub fn from_job(job: &Job, filename: Option<String>) -> Self {
        Self {
            job_id: job.id,
            input: job.input.clone(),
            filename,
            status: job.status,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

/// A member state change to fold into the batch aggregate.
#[derive(Debug, Clone)]
pub struct MemberUpdate {
    /// The member job.
    pub job_id: JobId,
    /// New status.
    pub status: JobStatus,
    /// New progress.
    pub progress: u8,
    /// Result, when completed.
    pub result: Option<TransformOutput>,
    /// Error, when failed.
    pub error: Option<JobError>,
}

impl From<&Job> for MemberUpdate {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

/// What a member update did to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    /// The aggregate changed; the batch is still running.
    Applied,
    /// This update finished the batch.
    BatchCompleted,
    /// The batch or the member was already terminal; nothing changed.
    Ignored,
}

/// A coordinated set of jobs sharing one operation and one callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Unique batch identifier.
    pub id: BatchId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Tenant or group the batch belongs to.
    pub tenant_id: Option<String>,
    /// Operation applied to every member.
    pub kind: OperationKind,
    /// Parameters applied to every member.
    pub params: TransformParams,
    /// Members in insertion order.
    pub members: Vec<BatchMember>,
    /// Number of members.
    pub total_files: usize,
    /// Members that completed.
    pub processed_files: usize,
    /// Members that failed.
    pub failed_files: usize,
    /// Aggregate progress, 0..=100.
    pub progress: u8,
    /// Current status.
    pub status: BatchStatus,
    /// Members submitted together during fan-out.
    pub group_size: usize,
    /// Callback target.
    pub webhook: Option<WebhookTarget>,
    /// When the batch was created.
    pub created_at: DateTime<Utc>,
    /// When the batch was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch completed or was cancelled.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the batch was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Tenant or group.
    pub tenant_id: Option<String>,
    /// Operation kind.
    pub kind: OperationKind,
    /// Transform parameters.
    pub params: TransformParams,
    /// Fan-out group size.
    pub group_size: usize,
    /// Callback target.
    pub webhook: Option<WebhookTarget>,
}

impl Batch {
    /// Create an empty pending batch.
    pub fn new(new: NewBatch, now: DateTime<Utc>) -> Self {
        Self {
            id: BatchId::new(),
            name: new.name,
            description: new.description,
            tenant_id: new.tenant_id,
            kind: new.kind,
            params: new.params,
            members: Vec::new(),
            total_files: 0,
            processed_files: 0,
            failed_files: 0,
            progress: 0,
            status: BatchStatus::Pending,
            group_size: new.group_size.max(1),
            webhook: new.webhook,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Fail with `BATCH_ALREADY_STARTED` unless the batch is pending.
    pub fn ensure_accepts_files(&self) -> AppResult<()> {
        if self.status != BatchStatus::Pending {
            return Err(AppError::conflict(format!(
                "Batch {} already started (status '{}')",
                self.id, self.status
            ))
            .with_code(codes::BATCH_ALREADY_STARTED));
        }
        Ok(())
    }

    /// Append members. Only legal while pending.
    pub fn add_members(
        &mut self,
        members: impl IntoIterator<Item = BatchMember>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.ensure_accepts_files()?;
        self.members.extend(members);
        self.total_files = self.members.len();
        self.updated_at = now;
        Ok(())
    }

    /// Move a pending, non-empty batch to processing.
    pub fn start(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != BatchStatus::Pending {
            return Err(AppError::conflict(format!(
                "Batch {} cannot start from status '{}'",
                self.id, self.status
            )));
        }
        if self.members.is_empty() {
            return Err(AppError::validation(format!(
                "Batch {} has no files to process",
                self.id
            )));
        }
        self.status = BatchStatus::Processing;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Fold a member change into the aggregate.
    ///
    /// Once the batch is terminal, or the member already terminal, the
    /// update is ignored.
    pub fn apply_member_update(&mut self, update: &MemberUpdate, now: DateTime<Utc>) -> MemberOutcome {
        if self.status.is_terminal() {
            return MemberOutcome::Ignored;
        }
        let Some(member) = self.members.iter_mut().find(|m| m.job_id == update.job_id) else {
            return MemberOutcome::Ignored;
        };
        if member.status.is_terminal() {
            return MemberOutcome::Ignored;
        }
        member.status = update.status;
        member.progress = update.progress;
        member.result = update.result.clone();
        member.error = update.error.clone();
        self.recompute();
        self.updated_at = now;

        if self.status == BatchStatus::Processing
            && self.processed_files + self.failed_files == self.total_files
        {
            self.status = BatchStatus::Completed;
            self.completed_at = Some(now);
            return MemberOutcome::BatchCompleted;
        }
        MemberOutcome::Applied
    }

    /// Fails with `BATCH_TERMINAL` once the batch has finished.
    pub fn ensure_cancellable(&self) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "Cannot cancel batch {}: already {}",
                self.id, self.status
            ))
            .with_code(codes::BATCH_TERMINAL));
        }
        Ok(())
    }

    /// Cancel the batch and every non-terminal member snapshot.
    ///
    /// Returns the member jobs that were still live.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> AppResult<Vec<JobId>> {
        self.ensure_cancellable()?;
        let mut live = Vec::new();
        for member in self.members.iter_mut().filter(|m| !m.status.is_terminal()) {
            member.status = JobStatus::Cancelled;
            live.push(member.job_id);
        }
        self.recompute();
        self.status = BatchStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(live)
    }

    /// Recompute counts and aggregate progress from the member snapshots.
    pub fn recompute(&mut self) {
        self.total_files = self.members.len();
        self.processed_files = self
            .members
            .iter()
            .filter(|m| m.status == JobStatus::Completed)
            .count();
        self.failed_files = self
            .members
            .iter()
            .filter(|m| m.status == JobStatus::Failed)
            .count();
        self.progress = if self.total_files == 0 {
            0
        } else {
            let sum: u64 = self.members.iter().map(|m| u64::from(m.progress)).sum();
            (sum as f64 / self.total_files as f64).round() as u8
        };
    }

    /// Member ids in insertion order.
    pub fn member_ids(&self) -> Vec<JobId> {
        self.members.iter().map(|m| m.job_id).collect()
    }
}

impl Record for Batch {
    type Id = BatchId;
    type Status = BatchStatus;

    fn record_id(&self) -> BatchId {
        self.id
    }

    fn record_status(&self) -> BatchStatus {
        self.status
    }
}
