//! # mediaflow-storage
//!
//! Artifact store implementations for MediaFlow (local filesystem and
//! in-memory) and the resumable chunked upload session manager that
//! feeds large inputs into the pipeline.

pub mod chunked;
pub mod providers;

pub use chunked::{InitUpload, UploadObserver, UploadProgress, UploadSessionManager};
pub use providers::{LocalArtifactStore, MemoryArtifactStore, build_artifact_store};
