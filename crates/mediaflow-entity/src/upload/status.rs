//! Upload session status enumeration.

use serde::{Deserialize, Serialize};

/// Status of a chunked upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Created, no chunk received yet.
    Initialized,
    /// At least one chunk received.
    Receiving,
    /// All chunks received and assembled.
    Completed,
    /// Assembly failed.
    Failed,
    /// Released by the client.
    Cancelled,
    /// Passed its expiry time before completing.
    Expired,
}

impl UploadStatus {
    /// Check if the session is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Return the status as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Receiving => "receiving",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
