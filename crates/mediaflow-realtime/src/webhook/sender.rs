//! Webhook transports.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use mediaflow_core::config::webhook::WebhookConfig;
use mediaflow_core::error::AppError;
use mediaflow_core::result::AppResult;
use mediaflow_entity::WebhookTarget;

use super::payload::WebhookPayload;

/// Header carrying the payload timestamp.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Delivers one payload to one target.
#[async_trait]
pub trait WebhookSender: Send + Sync + std::fmt::Debug {
    /// Make a single delivery attempt.
    async fn send(&self, target: &WebhookTarget, payload: &WebhookPayload) -> AppResult<()>;
}

/// Posts payloads as JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: Client,
    secret_header: String,
    default_secret: Option<String>,
}

impl HttpWebhookSender {
    /// Build a sender from configuration.
    pub fn new(config: &WebhookConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                AppError::configuration(format!("Failed to build webhook client: {e}"))
            })?;

        Ok(Self {
            client,
            secret_header: config.secret_header.clone(),
            default_secret: config.default_secret.clone(),
        })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, target: &WebhookTarget, payload: &WebhookPayload) -> AppResult<()> {
        let mut request = self
            .client
            .post(&target.url)
            .header(TIMESTAMP_HEADER, payload.timestamp.to_rfc3339())
            .json(payload);

        if let Some(secret) = target.secret.as_ref().or(self.default_secret.as_ref()) {
            request = request.header(self.secret_header.as_str(), secret.as_str());
        }

        let response = request.send().await.map_err(|e| {
            AppError::delivery(format!("Webhook request to {} failed: {e}", target.url))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::delivery(format!(
                "Webhook to {} returned {status}: {body}",
                target.url
            )));
        }

        tracing::debug!(url = %target.url, event = ?payload.event, id = %payload.id, "Webhook delivered");
        Ok(())
    }
}

/// Keeps every delivery in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingWebhookSender {
    deliveries: Mutex<Vec<(WebhookTarget, WebhookPayload)>>,
    fail: bool,
}

impl RecordingWebhookSender {
    /// A sender that records and succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender that records and then reports a delivery error.
    pub fn failing() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Everything sent so far.
    pub fn deliveries(&self) -> Vec<(WebhookTarget, WebhookPayload)> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Payloads sent for a source id.
    pub fn deliveries_for(&self, id: &str) -> Vec<WebhookPayload> {
        self.deliveries()
            .into_iter()
            .filter(|(_, payload)| payload.id == id)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhookSender {
    async fn send(&self, target: &WebhookTarget, payload: &WebhookPayload) -> AppResult<()> {
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push((target.clone(), payload.clone()));
        }
        if self.fail {
            return Err(AppError::delivery(format!("Webhook to {} refused", target.url)));
        }
        Ok(())
    }
}
