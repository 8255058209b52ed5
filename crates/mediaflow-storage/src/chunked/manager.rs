//! Resumable upload session manager.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use validator::Validate;

use mediaflow_core::config::upload::UploadConfig;
use mediaflow_core::error::{AppError, codes};
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::repository::Repository;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::types::{ArtifactRef, UploadId};
use mediaflow_entity::WebhookTarget;
use mediaflow_entity::upload::{NewUploadSession, UploadSession, UploadStatus};

use super::assembler::ChunkAssembler;
use super::cleanup::ChunkCleanup;
use super::observer::UploadObserver;
use super::writer::ChunkWriter;

/// Request to open an upload session.
#[derive(Debug, Clone, Validate)]
pub struct InitUpload {
    /// Target file name.
    #[validate(length(min = 1, max = 255, message = "Filename must be 1-255 characters"))]
    pub filename: String,
    /// Declared total size in bytes.
    #[validate(range(min = 1, message = "Total size must be positive"))]
    pub total_size: u64,
    /// MIME type.
    #[validate(length(min = 1, max = 255, message = "Content type is required"))]
    pub content_type: String,
    /// Chunk size; the configured default applies when absent.
    #[validate(range(min = 1, message = "Chunk size must be positive"))]
    pub chunk_size: Option<u64>,
    /// Callback URL notified on completion.
    #[validate(url(message = "Webhook URL is invalid"))]
    pub webhook_url: Option<String>,
    /// Secret sent with the callback.
    pub webhook_secret: Option<String>,
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    /// Session identifier.
    pub id: UploadId,
    /// Current status.
    pub status: UploadStatus,
    /// Distinct chunks received.
    pub received_chunks: u32,
    /// Chunks needed.
    pub expected_chunks: u32,
    /// Received indices in ascending order.
    pub received_indices: Vec<u32>,
    /// `round(received / expected * 100)`.
    pub progress: u8,
    /// Assembled artifact, once completed.
    pub artifact: Option<ArtifactRef>,
    /// Absolute expiry time.
    pub expires_at: DateTime<Utc>,
}

impl From<&UploadSession> for UploadProgress {
    fn from(session: &UploadSession) -> Self {
        Self {
            id: session.id,
            status: session.status,
            received_chunks: session.received_count(),
            expected_chunks: session.expected_chunks,
            received_indices: session.received_indices(),
            progress: session.progress(),
            artifact: session.artifact.clone(),
            expires_at: session.expires_at,
        }
    }
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Live sessions moved to `expired`.
    pub expired: usize,
    /// Terminal sessions removed after their retention window.
    pub purged: usize,
}

/// Owns every upload session and its chunk storage.
///
/// Chunk blobs are written outside the session lock so different indices
/// upload concurrently. Recording an index, the completeness check and
/// assembly all run under the per-session lock, which makes the
/// `completed` transition happen exactly once.
pub struct UploadSessionManager {
    repo: Arc<dyn Repository<UploadSession>>,
    writer: ChunkWriter,
    assembler: ChunkAssembler,
    cleanup: ChunkCleanup,
    locks: DashMap<UploadId, Arc<Mutex<()>>>,
    observer: Option<Arc<dyn UploadObserver>>,
    config: UploadConfig,
}

impl std::fmt::Debug for UploadSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSessionManager")
            .field("sessions_locked", &self.locks.len())
            .field("config", &self.config)
            .finish()
    }
}

impl UploadSessionManager {
    /// Create a manager storing chunks and outputs in `store`.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        repo: Arc<dyn Repository<UploadSession>>,
        config: UploadConfig,
    ) -> Self {
        Self {
            repo,
            writer: ChunkWriter::new(Arc::clone(&store)),
            assembler: ChunkAssembler::new(Arc::clone(&store)),
            cleanup: ChunkCleanup::new(store),
            locks: DashMap::new(),
            observer: None,
            config,
        }
    }

    /// Attach the progress/completion observer.
    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Open a new session.
    pub async fn init(&self, request: InitUpload) -> AppResult<UploadSession> {
        request.validate()?;
        if request.total_size > self.config.max_file_size_bytes {
            return Err(AppError::validation(format!(
                "File size {} exceeds the limit of {} bytes",
                request.total_size, self.config.max_file_size_bytes
            )));
        }

        let webhook = request.webhook_url.map(|url| WebhookTarget {
            url,
            secret: request.webhook_secret,
        });
        let session = UploadSession::new(
            NewUploadSession {
                filename: request.filename,
                content_type: request.content_type,
                total_size: request.total_size,
                chunk_size: request
                    .chunk_size
                    .unwrap_or(self.config.default_chunk_size_bytes),
                webhook,
            },
            Duration::hours(self.config.session_ttl_hours),
            Utc::now(),
        )?;
        self.repo.create(&session).await?;

        info!(
            upload_id = %session.id,
            filename = %session.filename,
            total_size = session.total_size,
            expected_chunks = session.expected_chunks,
            "Upload session initialized"
        );
        Ok(session)
    }

    /// Store one chunk and complete the session when it was the last one.
    pub async fn put_chunk(&self, upload_id: UploadId, index: u32, data: Bytes) -> AppResult<UploadProgress> {
        // Cheap rejection before any bytes are written.
        let session = self.load(upload_id).await?;
        session.ensure_accepts_chunk(index, Utc::now())?;

        let chunk = self.writer.write_chunk(upload_id, index, data).await?;

        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let mut session = self.load(upload_id).await?;
        if let Err(e) = session.ensure_accepts_chunk(index, Utc::now()) {
            self.writer.discard(&chunk).await;
            return Err(e);
        }

        let replaced = session.record_chunk(index, chunk);
        self.repo.update(&session).await?;
        if let Some(old) = replaced {
            self.writer.discard(&old).await;
        }
        if let Some(observer) = &self.observer {
            observer.on_progress(&session).await;
        }

        if session.is_complete() {
            self.complete(&mut session).await?;
        }
        Ok(UploadProgress::from(&session))
    }

    /// Return the current status of a session.
    pub async fn status(&self, upload_id: UploadId) -> AppResult<UploadProgress> {
        let session = self.load(upload_id).await?;
        Ok(UploadProgress::from(&session))
    }

    /// Return the full session record.
    pub async fn get(&self, upload_id: UploadId) -> AppResult<UploadSession> {
        self.load(upload_id).await
    }

    /// Release a session on client request.
    pub async fn cancel(&self, upload_id: UploadId) -> AppResult<UploadProgress> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let mut session = self.load(upload_id).await?;
        session.cancel(Utc::now())?;
        self.repo.update(&session).await?;
        self.cleanup.release_quietly(upload_id).await;
        if let Some(observer) = &self.observer {
            observer.on_closed(&session).await;
        }

        info!(upload_id = %upload_id, "Upload session cancelled");
        Ok(UploadProgress::from(&session))
    }

    /// Expire overdue sessions and purge terminal ones past retention.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();

        let mut live = self.repo.find_by_status(UploadStatus::Initialized).await?;
        live.extend(self.repo.find_by_status(UploadStatus::Receiving).await?);
        for candidate in live.into_iter().filter(|s| s.is_expired(now)) {
            let lock = self.lock_for(candidate.id);
            let _guard = lock.lock().await;

            let Some(mut session) = self.repo.find_by_id(&candidate.id).await? else {
                continue;
            };
            if session.status.is_terminal() || !session.is_expired(now) {
                continue;
            }
            session.expire(now);
            self.repo.update(&session).await?;
            self.cleanup.release_quietly(session.id).await;
            if let Some(observer) = &self.observer {
                observer.on_closed(&session).await;
            }
            report.expired += 1;
        }

        let retention = Duration::hours(self.config.retention_hours);
        for status in [
            UploadStatus::Completed,
            UploadStatus::Failed,
            UploadStatus::Cancelled,
            UploadStatus::Expired,
        ] {
            for session in self.repo.find_by_status(status).await? {
                let finished = session.completed_at.unwrap_or(session.created_at);
                if finished + retention <= now {
                    self.repo.delete(&session.id).await?;
                    self.locks.remove(&session.id);
                    report.purged += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                purged = report.purged,
                "Upload session sweep finished"
            );
        }
        Ok(report)
    }

    /// Assemble, mark the session completed and release its chunks.
    ///
    /// Must be called with the session lock held.
    async fn complete(&self, session: &mut UploadSession) -> AppResult<()> {
        let assembled = self.assembler.assemble(session).await.and_then(|(artifact, size)| {
            if size == session.total_size {
                Ok(artifact)
            } else {
                Err(AppError::storage(format!(
                    "Assembled {size} bytes but {} were declared",
                    session.total_size
                )))
            }
        });

        match assembled {
            Ok(artifact) => {
                session.mark_completed(artifact, Utc::now());
                self.repo.update(session).await?;
                self.cleanup.release_quietly(session.id).await;
                info!(upload_id = %session.id, "Upload session completed");
                if let Some(observer) = &self.observer {
                    observer.on_completed(session).await;
                }
                Ok(())
            }
            Err(e) => {
                warn!(upload_id = %session.id, error = %e, "Chunk assembly failed");
                session.mark_failed(e.message.clone(), Utc::now());
                self.repo.update(session).await?;
                self.cleanup.release_quietly(session.id).await;
                if let Some(observer) = &self.observer {
                    observer.on_closed(session).await;
                }
                Err(e)
            }
        }
    }

    async fn load(&self, upload_id: UploadId) -> AppResult<UploadSession> {
        self.repo.find_by_id(&upload_id).await?.ok_or_else(|| {
            AppError::not_found(format!("Upload session {upload_id} not found"))
                .with_code(codes::SESSION_NOT_FOUND)
        })
    }

    fn lock_for(&self, upload_id: UploadId) -> Arc<Mutex<()>> {
        self.locks
            .entry(upload_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
