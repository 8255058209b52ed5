//! Job entity model and its state machine.

use chrono::{DateTime, Utc};
use mediaflow_core::error::codes;
use mediaflow_core::traits::repository::Record;
use mediaflow_core::traits::transform::{TransformError, TransformErrorKind};
use mediaflow_core::types::{ArtifactRef, BatchId, JobId, OperationKind, TransformOutput, TransformParams};
use mediaflow_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use super::status::{JobPriority, JobStatus};
use crate::webhook::WebhookTarget;

/// Error descriptor recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Human-readable reason.
    pub message: String,
    /// Whether the failure was transient or permanent.
    pub kind: TransformErrorKind,
}

impl From<TransformError> for JobError {
    fn from(err: TransformError) -> Self {
        Self {
            message: err.message,
            kind: err.kind,
        }
    }
}

/// Result of applying a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Progress was stored.
    Applied,
    /// The report was lower than the stored value and was dropped.
    Stale,
    /// The job is not processing; nothing changed.
    Ignored,
}

/// A transform job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Owning batch, `None` for standalone jobs.
    pub batch_id: Option<BatchId>,
    /// Input artifact.
    pub input: ArtifactRef,
    /// Operation kind (also the queue the job is dispatched on).
    pub kind: OperationKind,
    /// Parameters handed to the transform untouched.
    pub params: TransformParams,
    /// Current status.
    pub status: JobStatus,
    /// Progress percentage, 0..=100.
    pub progress: u8,
    /// Output descriptor, present only when completed.
    pub result: Option<TransformOutput>,
    /// Error descriptor, present only when failed.
    pub error: Option<JobError>,
    /// Number of attempts started so far.
    pub attempts: u32,
    /// Queue delivery that owns the current attempt.
    #[serde(default)]
    pub delivery: Option<u64>,
    /// Dispatch priority.
    pub priority: JobPriority,
    /// Callback target (standalone jobs only).
    pub webhook: Option<WebhookTarget>,
    /// Tenant or group the job belongs to.
    pub tenant_id: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Owning batch.
    pub batch_id: Option<BatchId>,
    /// Input artifact.
    pub input: ArtifactRef,
    /// Operation kind.
    pub kind: OperationKind,
    /// Transform parameters.
    pub params: TransformParams,
    /// Dispatch priority.
    pub priority: JobPriority,
    /// Callback target.
    pub webhook: Option<WebhookTarget>,
    /// Tenant or group.
    pub tenant_id: Option<String>,
}

impl Job {
    /// Create a pending job.
    pub fn new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            batch_id: new.batch_id,
            input: new.input,
            kind: new.kind,
            params: new.params,
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            attempts: 0,
            delivery: None,
            priority: new.priority,
            webhook: new.webhook,
            tenant_id: new.tenant_id,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Whether the job belongs to a batch.
    pub fn is_member(&self) -> bool {
        self.batch_id.is_some()
    }

    /// Start a fresh processing phase owned by `delivery`.
    ///
    /// Used for the first attempt and for every redelivery: progress goes
    /// back to zero and the attempt counter moves forward. Writes from any
    /// earlier delivery are rejected from here on.
    pub fn begin_attempt(&mut self, delivery: u64, now: DateTime<Utc>) -> AppResult<()> {
        self.ensure_not_terminal("start")?;
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.attempts += 1;
        self.delivery = Some(delivery);
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Apply a progress report, clamping values above 100.
    pub fn apply_progress(&mut self, percent: u32, now: DateTime<Utc>) -> AppResult<ProgressOutcome> {
        self.ensure_not_terminal("report progress on")?;
        if self.status != JobStatus::Processing {
            return Ok(ProgressOutcome::Ignored);
        }
        let percent = percent.min(100) as u8;
        if percent < self.progress {
            return Ok(ProgressOutcome::Stale);
        }
        self.progress = percent;
        self.updated_at = now;
        Ok(ProgressOutcome::Applied)
    }

    /// Record a successful result.
    pub fn complete(&mut self, output: TransformOutput, now: DateTime<Utc>) -> AppResult<()> {
        self.ensure_not_terminal("complete")?;
        if self.status != JobStatus::Processing {
            return Err(AppError::conflict(format!(
                "Job {} cannot complete from status '{}'",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(output);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record a final failure.
    pub fn fail(&mut self, error: JobError, now: DateTime<Utc>) -> AppResult<()> {
        self.ensure_not_terminal("fail")?;
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Check that `delivery` still owns the job.
    ///
    /// Terminal jobs fail with `JOB_TERMINAL` first, so late writes keep
    /// their usual classification.
    pub fn ensure_delivery(&self, delivery: u64) -> AppResult<()> {
        self.ensure_not_terminal("update")?;
        if self.delivery.is_some_and(|owner| owner != delivery) {
            return Err(AppError::conflict(format!(
                "Delivery {delivery} no longer owns job {}",
                self.id
            ))
            .with_code(codes::STALE_ATTEMPT));
        }
        Ok(())
    }

    /// Put a failed job back to pending for an explicit retry.
    ///
    /// The only transition out of a terminal status.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != JobStatus::Failed {
            return Err(AppError::conflict(format!(
                "Only failed jobs can be retried; job {} is {}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.error = None;
        self.delivery = None;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Cancel the job. No progress or result is accepted afterwards.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.ensure_not_terminal("cancel")?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn ensure_not_terminal(&self, action: &str) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "Cannot {action} job {}: already {}",
                self.id, self.status
            ))
            .with_code(codes::JOB_TERMINAL));
        }
        Ok(())
    }
}

impl Record for Job {
    type Id = JobId;
    type Status = JobStatus;

    fn record_id(&self) -> JobId {
        self.id
    }

    fn record_status(&self) -> JobStatus {
        self.status
    }
}
