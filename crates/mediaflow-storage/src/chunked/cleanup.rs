//! Chunk storage release for finished, cancelled and expired uploads.

use std::sync::Arc;

use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::types::UploadId;

use super::writer::ChunkWriter;

/// Releases the chunk blobs of an upload session.
#[derive(Debug, Clone)]
pub struct ChunkCleanup {
    /// Store where chunks are kept.
    store: Arc<dyn ArtifactStore>,
}

impl ChunkCleanup {
    /// Create a new chunk cleanup handler.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Delete every chunk stored for an upload.
    pub async fn release(&self, upload_id: UploadId) -> AppResult<()> {
        self.store
            .delete_prefix(&ChunkWriter::upload_prefix(upload_id))
            .await?;
        tracing::debug!(upload_id = %upload_id, "Released chunk storage");
        Ok(())
    }

    /// Like [`release`](Self::release) but only logs failures.
    pub async fn release_quietly(&self, upload_id: UploadId) {
        if let Err(e) = self.release(upload_id).await {
            tracing::warn!(upload_id = %upload_id, error = %e, "Failed to release chunk storage");
        }
    }
}
