//! Artifact references and transform descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to a blob held by an [`ArtifactStore`].
///
/// [`ArtifactStore`]: crate::traits::storage::ArtifactStore
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wrap a store-specific location.
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Return the store-specific location.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters passed to a transform (width, height, quality, bitrate...).
///
/// The pipeline never interprets them.
pub type TransformParams = serde_json::Map<String, serde_json::Value>;

/// Description of a successful transform result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutput {
    /// Where the output artifact was stored.
    pub location: ArtifactRef,
    /// Size of the output in bytes.
    pub size_bytes: u64,
    /// Output format (e.g. `mp4`, `webp`).
    pub format: String,
}
