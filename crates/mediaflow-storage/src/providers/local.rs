//! Local filesystem artifact store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use mediaflow_core::error::{AppError, ErrorKind};
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::{ArtifactStore, ByteStream};
use mediaflow_core::types::ArtifactRef;

use super::unique_location;

/// Artifact store writing blobs below a root directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    /// Root directory for all stored blobs.
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create a new local store rooted at the given path.
    pub async fn new(root_path: &str) -> AppResult<Self> {
        let root = PathBuf::from(root_path);
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create storage root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    /// Resolve a relative location to an absolute path within the root.
    fn resolve(&self, location: &str) -> AppResult<PathBuf> {
        let clean = Path::new(location.trim_start_matches('/'));
        if clean
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::validation(format!(
                "Invalid artifact location: {location}"
            )));
        }
        Ok(self.root.join(clean))
    }

    /// Ensure the parent directory of a path exists.
    async fn ensure_parent(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create parent directory: {}", parent.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn provider_type(&self) -> &str {
        "local"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(fs::metadata(&self.root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    async fn put(&self, prefix: &str, data: Bytes) -> AppResult<ArtifactRef> {
        let location = unique_location(prefix);
        let full_path = self.resolve(&location)?;
        self.ensure_parent(&full_path).await?;

        fs::write(&full_path, &data).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to write artifact: {location}"),
                e,
            )
        })?;

        debug!(location = %location, bytes = data.len(), "Wrote artifact");
        Ok(ArtifactRef::new(location))
    }

    async fn put_stream(&self, prefix: &str, mut stream: ByteStream) -> AppResult<(ArtifactRef, u64)> {
        let location = unique_location(prefix);
        let full_path = self.resolve(&location)?;
        self.ensure_parent(&full_path).await?;

        let mut file = fs::File::create(&full_path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create artifact: {location}"),
                e,
            )
        })?;

        let mut total_bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&full_path).await;
                    return Err(e);
                }
            };
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to write artifact data", e)
            })?;
        }

        file.flush()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Storage, "Failed to flush artifact", e))?;

        debug!(location = %location, bytes = total_bytes, "Wrote artifact from stream");
        Ok((ArtifactRef::new(location), total_bytes))
    }

    async fn get(&self, artifact: &ArtifactRef) -> AppResult<Bytes> {
        let full_path = self.resolve(artifact.as_str())?;
        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("Artifact not found: {artifact}"))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to read artifact: {artifact}"),
                    e,
                )
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, artifact: &ArtifactRef) -> AppResult<()> {
        let full_path = self.resolve(artifact.as_str())?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to delete artifact: {artifact}"),
                e,
            )),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
        let full_path = self.resolve(prefix)?;
        match fs::remove_dir_all(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to delete prefix: {prefix}"),
                e,
            )),
        }
    }

    async fn exists(&self, artifact: &ArtifactRef) -> AppResult<bool> {
        let full_path = self.resolve(artifact.as_str())?;
        Ok(fs::try_exists(&full_path).await.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, LocalArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = store().await;

        let data = Bytes::from("hello world");
        let artifact = store.put("inputs", data.clone()).await.unwrap();
        assert!(artifact.as_str().starts_with("inputs/"));
        assert!(store.exists(&artifact).await.unwrap());

        let read_back = store.get(&artifact).await.unwrap();
        assert_eq!(read_back, data);

        store.delete(&artifact).await.unwrap();
        assert!(!store.exists(&artifact).await.unwrap());
        store.delete(&artifact).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_never_overwrites() {
        let (_dir, store) = store().await;
        let a = store.put("same", Bytes::from("a")).await.unwrap();
        let b = store.put("same", Bytes::from("b")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get(&a).await.unwrap(), Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_put_stream_and_delete_prefix() {
        let (_dir, store) = store().await;
        let parts: Vec<AppResult<Bytes>> = vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd"))];
        let (artifact, size) = store
            .put_stream("uploads/x", Box::pin(futures::stream::iter(parts)))
            .await
            .unwrap();
        assert_eq!(size, 4);
        assert_eq!(store.get(&artifact).await.unwrap(), Bytes::from("abcd"));

        store.delete_prefix("uploads/x").await.unwrap();
        assert!(!store.exists(&artifact).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_locations() {
        let (_dir, store) = store().await;
        let err = store.get(&ArtifactRef::new("../etc/passwd")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.get(&ArtifactRef::new("nope/blob")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
