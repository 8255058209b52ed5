//! Collaborator traits defined in `mediaflow-core` and implemented by other crates.

pub mod repository;
pub mod storage;
pub mod transform;

pub use repository::{Record, Repository};
pub use storage::{ArtifactStore, ByteStream};
pub use transform::{ProgressReporter, Transform, TransformError, TransformErrorKind};
