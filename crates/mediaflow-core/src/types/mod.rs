//! Core type definitions used across the MediaFlow workspace.

pub mod artifact;
pub mod id;
pub mod kind;

pub use artifact::{ArtifactRef, TransformOutput, TransformParams};
pub use id::*;
pub use kind::OperationKind;
