//! In-memory artifact store, used in tests and single-process setups.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::StreamExt;

use mediaflow_core::error::AppError;
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::{ArtifactStore, ByteStream};
use mediaflow_core::types::ArtifactRef;

use super::unique_location;

/// Artifact store keeping every blob in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: DashMap<String, Bytes>,
}

impl MemoryArtifactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of blobs whose location starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        let prefix = format!("{}/", prefix.trim_matches('/'));
        self.blobs.iter().filter(|e| e.key().starts_with(&prefix)).count()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn provider_type(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }

    async fn put(&self, prefix: &str, data: Bytes) -> AppResult<ArtifactRef> {
        let location = unique_location(prefix);
        self.blobs.insert(location.clone(), data);
        Ok(ArtifactRef::new(location))
    }

    async fn put_stream(&self, prefix: &str, mut stream: ByteStream) -> AppResult<(ArtifactRef, u64)> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let size = buf.len() as u64;
        let artifact = self.put(prefix, buf.freeze()).await?;
        Ok((artifact, size))
    }

    async fn get(&self, artifact: &ArtifactRef) -> AppResult<Bytes> {
        self.blobs
            .get(artifact.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found(format!("Artifact not found: {artifact}")))
    }

    async fn delete(&self, artifact: &ArtifactRef) -> AppResult<()> {
        self.blobs.remove(artifact.as_str());
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
        let prefix = format!("{}/", prefix.trim_matches('/'));
        self.blobs.retain(|location, _| !location.starts_with(&prefix));
        Ok(())
    }

    async fn exists(&self, artifact: &ArtifactRef) -> AppResult<bool> {
        Ok(self.blobs.contains_key(artifact.as_str()))
    }
}
