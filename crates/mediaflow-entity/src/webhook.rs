//! Callback targets attached to jobs, batches and uploads.

use serde::{Deserialize, Serialize};

/// Where to deliver a terminal-state callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTarget {
    /// Absolute URL receiving the JSON POST.
    pub url: String,
    /// Shared secret sent in the secret header. Falls back to the
    /// configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl WebhookTarget {
    /// Target without a per-target secret.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
        }
    }

    /// Attach a per-target secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}
