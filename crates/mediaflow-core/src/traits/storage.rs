//! Artifact store trait for pluggable blob storage backends.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::result::AppResult;
use crate::types::artifact::ArtifactRef;

/// A byte stream type used for writing large artifacts piecewise.
pub type ByteStream = Pin<Box<dyn Stream<Item = AppResult<Bytes>> + Send>>;

/// Trait for blob storage backends holding chunks, inputs and outputs.
///
/// Callers name a prefix; the store picks a unique location under it and
/// hands back an opaque [`ArtifactRef`]. Writing twice never overwrites an
/// earlier blob.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g. "local", "memory").
    fn provider_type(&self) -> &str;

    /// Check whether the provider is healthy and reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Store a blob under `prefix`.
    async fn put(&self, prefix: &str, data: Bytes) -> AppResult<ArtifactRef>;

    /// Store a blob from a stream under `prefix`, returning its reference and size.
    async fn put_stream(&self, prefix: &str, stream: ByteStream) -> AppResult<(ArtifactRef, u64)>;

    /// Read a whole blob into memory.
    async fn get(&self, artifact: &ArtifactRef) -> AppResult<Bytes>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, artifact: &ArtifactRef) -> AppResult<()>;

    /// Delete every blob under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> AppResult<()>;

    /// Check whether a blob exists.
    async fn exists(&self, artifact: &ArtifactRef) -> AppResult<bool>;
}
