//! Chunked upload session tracking progress of a multi-part upload.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use mediaflow_core::error::codes;
use mediaflow_core::traits::repository::Record;
use mediaflow_core::types::{ArtifactRef, UploadId};
use mediaflow_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use super::status::UploadStatus;
use crate::webhook::WebhookTarget;

/// A resumable upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique upload session identifier.
    pub id: UploadId,
    /// The intended file name.
    pub filename: String,
    /// MIME type declared by the client.
    pub content_type: String,
    /// Declared total size in bytes.
    pub total_size: u64,
    /// Size of each chunk in bytes (the last one may be shorter).
    pub chunk_size: u64,
    /// Number of chunks needed to complete the upload.
    pub expected_chunks: u32,
    /// Stored chunk per received index.
    pub chunks: BTreeMap<u32, ArtifactRef>,
    /// Current status.
    pub status: UploadStatus,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry time.
    pub expires_at: DateTime<Utc>,
    /// When the session reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Assembled artifact, present only when completed.
    pub artifact: Option<ArtifactRef>,
    /// Callback target.
    pub webhook: Option<WebhookTarget>,
    /// Failure reason, present only when failed.
    pub error: Option<String>,
}

/// Data required to open a session.
#[derive(Debug, Clone)]
pub struct NewUploadSession {
    /// Target file name.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// Declared total size in bytes.
    pub total_size: u64,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Callback target.
    pub webhook: Option<WebhookTarget>,
}

impl UploadSession {
    /// Open a session expiring `ttl` after `now`.
    ///
    /// Fails when the chunk count does not fit in a `u32` chunk index.
    pub fn new(new: NewUploadSession, ttl: Duration, now: DateTime<Utc>) -> AppResult<Self> {
        let chunk_size = new.chunk_size.max(1);
        let expected_chunks = u32::try_from(new.total_size.div_ceil(chunk_size)).map_err(|_| {
            AppError::validation(format!(
                "Chunk size {chunk_size} is too small for {} bytes: more than {} chunks",
                new.total_size,
                u32::MAX
            ))
        })?;
        Ok(Self {
            id: UploadId::new(),
            filename: new.filename,
            content_type: new.content_type,
            total_size: new.total_size,
            chunk_size,
            expected_chunks,
            chunks: BTreeMap::new(),
            status: UploadStatus::Initialized,
            created_at: now,
            expires_at: now + ttl,
            completed_at: None,
            artifact: None,
            webhook: new.webhook,
            error: None,
        })
    }

    /// Number of distinct chunk indices received.
    pub fn received_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Received indices in ascending order.
    pub fn received_indices(&self) -> Vec<u32> {
        self.chunks.keys().copied().collect()
    }

    /// `round(received / expected * 100)`.
    pub fn progress(&self) -> u8 {
        if self.expected_chunks == 0 {
            return 0;
        }
        (f64::from(self.received_count()) / f64::from(self.expected_chunks) * 100.0).round() as u8
    }

    /// Whether every expected chunk has been received.
    pub fn is_complete(&self) -> bool {
        self.received_count() >= self.expected_chunks
    }

    /// Whether the expiry time has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Reject chunk uploads the session cannot take.
    pub fn ensure_accepts_chunk(&self, index: u32, now: DateTime<Utc>) -> AppResult<()> {
        match self.status {
            UploadStatus::Completed => {
                return Err(AppError::conflict(format!(
                    "Upload session {} is already completed",
                    self.id
                ))
                .with_code(codes::SESSION_ALREADY_COMPLETED));
            }
            UploadStatus::Cancelled | UploadStatus::Failed => {
                return Err(AppError::conflict(format!(
                    "Upload session {} is {}",
                    self.id, self.status
                ))
                .with_code(codes::SESSION_CLOSED));
            }
            UploadStatus::Expired => return Err(self.expired_error()),
            UploadStatus::Initialized | UploadStatus::Receiving => {}
        }
        if self.is_expired(now) {
            return Err(self.expired_error());
        }
        if index >= self.expected_chunks {
            return Err(AppError::resource_limit(format!(
                "Chunk index {index} out of range (expected 0..{})",
                self.expected_chunks
            ))
            .with_code(codes::INVALID_CHUNK_INDEX));
        }
        Ok(())
    }

    /// Record a stored chunk, returning the reference it replaced.
    pub fn record_chunk(&mut self, index: u32, chunk: ArtifactRef) -> Option<ArtifactRef> {
        if self.status == UploadStatus::Initialized {
            self.status = UploadStatus::Receiving;
        }
        self.chunks.insert(index, chunk)
    }

    /// Chunk references in strict index order.
    pub fn ordered_chunks(&self) -> Vec<ArtifactRef> {
        self.chunks.values().cloned().collect()
    }

    /// Mark the session completed with its assembled artifact.
    pub fn mark_completed(&mut self, artifact: ArtifactRef, now: DateTime<Utc>) {
        self.status = UploadStatus::Completed;
        self.artifact = Some(artifact);
        self.completed_at = Some(now);
    }

    /// Mark the session failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = UploadStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(now);
    }

    /// Release the session on client request.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        match self.status {
            UploadStatus::Completed => Err(AppError::conflict(format!(
                "Upload session {} is already completed",
                self.id
            ))
            .with_code(codes::SESSION_ALREADY_COMPLETED)),
            status if status.is_terminal() => Err(AppError::conflict(format!(
                "Upload session {} is {status}",
                self.id
            ))
            .with_code(codes::SESSION_CLOSED)),
            _ => {
                self.status = UploadStatus::Cancelled;
                self.completed_at = Some(now);
                Ok(())
            }
        }
    }

    /// Mark the session expired.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = UploadStatus::Expired;
        self.completed_at = Some(now);
    }

    fn expired_error(&self) -> AppError {
        AppError::resource_limit(format!("Upload session {} has expired", self.id))
            .with_code(codes::SESSION_EXPIRED)
    }
}

impl Record for UploadSession {
    type Id = UploadId;
    type Status = UploadStatus;

    fn record_id(&self) -> UploadId {
        self.id
    }

    fn record_status(&self) -> UploadStatus {
        self.status
    }
}
