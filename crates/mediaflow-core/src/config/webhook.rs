//! Webhook delivery configuration.

use serde::{Deserialize, Serialize};

/// Outbound webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Whether webhooks are sent at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Header carrying the shared secret.
    #[serde(default = "default_secret_header")]
    pub secret_header: String,
    /// Secret used when a target does not carry its own.
    #[serde(default)]
    pub default_secret: Option<String>,
    /// `User-Agent` sent with every callback.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: default_timeout(),
            secret_header: default_secret_header(),
            default_secret: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

fn default_secret_header() -> String {
    "X-Webhook-Secret".to_string()
}

fn default_user_agent() -> String {
    "mediaflow-webhook/0.1".to_string()
}
