//! Pipeline event type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediaflow_core::types::{ArtifactRef, BatchId, JobId, UploadId};
use mediaflow_entity::batch::{Batch, BatchStatus};
use mediaflow_entity::job::{Job, JobStatus};
use mediaflow_entity::upload::{UploadSession, UploadStatus};

/// Events published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    /// A job changed status or progress.
    JobProgress {
        /// Job ID.
        job_id: JobId,
        /// Owning batch, if any.
        batch_id: Option<BatchId>,
        /// Current status.
        status: JobStatus,
        /// Progress percentage.
        progress: u8,
        /// Attempt number.
        attempt: u32,
        /// Failure reason, when failed.
        error: Option<String>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A batch aggregate changed.
    BatchProgress {
        /// Batch ID.
        batch_id: BatchId,
        /// Current status.
        status: BatchStatus,
        /// Aggregate progress percentage.
        progress: u8,
        /// Number of members.
        total_files: usize,
        /// Completed members.
        processed_files: usize,
        /// Failed members.
        failed_files: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A batch was cancelled.
    BatchCancelled {
        /// Batch ID.
        batch_id: BatchId,
        /// Members that were cancelled.
        cancelled_jobs: Vec<JobId>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// An upload session received a chunk or changed status.
    UploadProgress {
        /// Upload session ID.
        upload_id: UploadId,
        /// Current status.
        status: UploadStatus,
        /// Received percentage.
        progress: u8,
        /// Chunks received so far.
        received_chunks: u32,
        /// Chunks expected.
        expected_chunks: u32,
        /// Assembled artifact, when completed.
        artifact: Option<ArtifactRef>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Snapshot event for a job.
    pub fn job(job: &Job) -> Self {
        Self::JobProgress {
            job_id: job.id,
            batch_id: job.batch_id,
            status: job.status,
            progress: job.progress,
            attempt: job.attempts,
            error: job.error.as_ref().map(|e| e.message.clone()),
            timestamp: job.updated_at,
        }
    }

    /// Snapshot event for a batch.
    pub fn batch(batch: &Batch) -> Self {
        Self::BatchProgress {
            batch_id: batch.id,
            status: batch.status,
            progress: batch.progress,
            total_files: batch.total_files,
            processed_files: batch.processed_files,
            failed_files: batch.failed_files,
            timestamp: batch.updated_at,
        }
    }

    /// Snapshot event for an upload session.
    pub fn upload(session: &UploadSession) -> Self {
        Self::UploadProgress {
            upload_id: session.id,
            status: session.status,
            progress: session.progress(),
            received_chunks: session.received_count(),
            expected_chunks: session.expected_chunks,
            artifact: session.artifact.clone(),
            timestamp: session.completed_at.unwrap_or_else(Utc::now),
        }
    }

    /// Whether this is the last event its source will publish.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::JobProgress { status, .. } => status.is_terminal(),
            Self::BatchProgress { status, .. } => status.is_terminal(),
            Self::BatchCancelled { .. } => true,
            Self::UploadProgress { status, .. } => status.is_terminal(),
        }
    }
}
