//! Single-attempt webhook delivery that never affects pipeline state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;

use mediaflow_entity::WebhookTarget;

use super::payload::WebhookPayload;
use super::sender::WebhookSender;

/// Makes exactly one delivery attempt per call and logs failures.
#[derive(Debug)]
pub struct WebhookNotifier {
    sender: Arc<dyn WebhookSender>,
    enabled: bool,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl WebhookNotifier {
    /// Create a notifier.
    pub fn new(sender: Arc<dyn WebhookSender>, enabled: bool) -> Self {
        Self {
            sender,
            enabled,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Deliver `payload` to `target`, if there is one.
    pub async fn notify(&self, target: Option<&WebhookTarget>, payload: WebhookPayload) {
        let Some(target) = target else {
            return;
        };
        if !self.enabled {
            tracing::debug!(id = %payload.id, "Webhooks disabled, skipping delivery");
            return;
        }

        match self.sender.send(target, &payload).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(url = %target.url, event = ?payload.event, id = %payload.id, status = %payload.status, "Webhook sent");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(url = %target.url, id = %payload.id, error = %e, "Webhook delivery failed");
            }
        }
    }

    /// Deliver on a background task.
    pub fn spawn_notify(
        self: &Arc<Self>,
        target: Option<WebhookTarget>,
        payload: WebhookPayload,
    ) -> Option<JoinHandle<()>> {
        let target = target?;
        let notifier = Arc::clone(self);
        Some(tokio::spawn(async move {
            notifier.notify(Some(&target), payload).await;
        }))
    }

    /// Successful deliveries so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Failed deliveries so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
