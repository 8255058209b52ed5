//! Operation kinds, which also name the queues jobs are dispatched on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The operation category of a job.
///
/// Each kind has its own queue, worker pool and concurrency limit. The
/// set is open: anything registered with the queue registry is a valid
/// kind, the constants below are the ones registered by default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationKind(String);

impl OperationKind {
    /// Video transcoding.
    pub const VIDEO_TRANSCODE: &'static str = "video-transcode";
    /// Audio format conversion.
    pub const AUDIO_CONVERT: &'static str = "audio-convert";
    /// Image resizing.
    pub const IMAGE_RESIZE: &'static str = "image-resize";
    /// Thumbnail extraction from a video.
    pub const VIDEO_THUMBNAIL: &'static str = "video-thumbnail";
    /// Archive extraction.
    pub const ARCHIVE_EXTRACT: &'static str = "archive-extract";
    /// The batch fan-out queue.
    pub const BATCH_PROCESS: &'static str = "batch-process";

    /// Create a kind from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The batch fan-out kind.
    pub fn batch() -> Self {
        Self::new(Self::BATCH_PROCESS)
    }

    /// Kinds registered on every queue registry.
    pub fn builtin() -> Vec<Self> {
        [
            Self::VIDEO_TRANSCODE,
            Self::AUDIO_CONVERT,
            Self::IMAGE_RESIZE,
            Self::VIDEO_THUMBNAIL,
            Self::ARCHIVE_EXTRACT,
            Self::BATCH_PROCESS,
        ]
        .into_iter()
        .map(Self::new)
        .collect()
    }

    /// Return the kind name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the batch fan-out kind.
    pub fn is_batch(&self) -> bool {
        self.0 == Self::BATCH_PROCESS
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
