//! Chunk assembler: concatenates chunks into the final artifact.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::ArtifactStore;
use mediaflow_core::types::ArtifactRef;
use mediaflow_entity::upload::UploadSession;

/// Assembles uploaded chunks into a single artifact.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    /// Store holding both the chunks and the assembled output.
    store: Arc<dyn ArtifactStore>,
}

impl ChunkAssembler {
    /// Create a new chunk assembler.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Concatenate the session's chunks in strict index order.
    ///
    /// Chunks are streamed one at a time into the output. Returns the
    /// assembled artifact and its size.
    pub async fn assemble(&self, session: &UploadSession) -> AppResult<(ArtifactRef, u64)> {
        tracing::info!(
            upload_id = %session.id,
            chunks = session.expected_chunks,
            "Assembling chunks"
        );

        let store = Arc::clone(&self.store);
        let chunks = stream::iter(session.ordered_chunks()).then(move |chunk| {
            let store = Arc::clone(&store);
            async move { store.get(&chunk).await }
        });

        let (artifact, size) = self
            .store
            .put_stream(&format!("uploads/{}", session.id), Box::pin(chunks))
            .await?;

        tracing::info!(
            upload_id = %session.id,
            artifact = %artifact,
            bytes = size,
            "Assembly complete"
        );
        Ok((artifact, size))
    }
}
