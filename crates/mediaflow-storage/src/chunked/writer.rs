//! Chunk writer for multi-part uploads.

use std::sync::Arc;

use bytes::Bytes;

use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::types::{ArtifactRef, UploadId};

/// Stores individual chunks of an upload session.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    /// The store holding chunk blobs.
    store: Arc<dyn ArtifactStore>,
}

impl ChunkWriter {
    /// Create a new chunk writer.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Store a single chunk. Every call produces a new blob, so concurrent
    /// uploads of the same index never tear each other.
    pub async fn write_chunk(&self, upload_id: UploadId, index: u32, data: Bytes) -> AppResult<ArtifactRef> {
        self.store.put(&Self::chunk_prefix(upload_id, index), data).await
    }

    /// Release a chunk blob that was replaced or never recorded.
    pub async fn discard(&self, chunk: &ArtifactRef) {
        if let Err(e) = self.store.delete(chunk).await {
            tracing::warn!(chunk = %chunk, error = %e, "Failed to discard chunk");
        }
    }

    /// Storage prefix for one chunk index.
    pub fn chunk_prefix(upload_id: UploadId, index: u32) -> String {
        format!("{}/chunk_{index:06}", Self::upload_prefix(upload_id))
    }

    /// Storage prefix holding every chunk of an upload.
    pub fn upload_prefix(upload_id: UploadId) -> String {
        format!("chunks/{upload_id}")
    }
}
