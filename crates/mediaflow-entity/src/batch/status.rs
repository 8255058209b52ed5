//! Batch status enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Accepting files, not started.
    Pending,
    /// Fanning out member jobs.
    Processing,
    /// Every member reached a terminal status.
    ///
    /// This holds even when some or all members failed: per-file failures
    /// are reported through `failed_files` and the member list, never
    /// through the batch status.
    Completed,
    /// Cancelled before all members finished.
    Cancelled,
}

impl BatchStatus {
    /// Check if the batch is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the batch still counts as active for its tenant.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
