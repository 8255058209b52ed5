//! Artifact store implementations.

pub mod local;
pub mod memory;

use std::sync::Arc;

use mediaflow_core::config::storage::StorageConfig;
use mediaflow_core::error::AppError;
use mediaflow_core::result::AppResult;
use mediaflow_core::traits::storage::ArtifactStore;

pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;

/// Build the artifact store selected by `storage.provider`.
pub async fn build_artifact_store(config: &StorageConfig) -> AppResult<Arc<dyn ArtifactStore>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalArtifactStore::new(&config.root_path).await?)),
        "memory" => Ok(Arc::new(MemoryArtifactStore::new())),
        other => Err(AppError::configuration(format!(
            "Unknown storage provider '{other}'"
        ))),
    }
}

/// Join a caller prefix with a fresh unique blob name.
pub(crate) fn unique_location(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = uuid::Uuid::now_v7();
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
