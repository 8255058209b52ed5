//! Publishes upload progress and sends the completion webhook.

use std::sync::Arc;

use async_trait::async_trait;

use mediaflow_entity::upload::UploadSession;
use mediaflow_realtime::{EventBus, PipelineEvent, Topic, WebhookNotifier, WebhookPayload};
use mediaflow_storage::UploadObserver;

/// Bridges upload sessions to the event bus and webhooks.
#[derive(Debug)]
pub struct UploadEventObserver {
    bus: Arc<EventBus>,
    notifier: Arc<WebhookNotifier>,
}

impl UploadEventObserver {
    /// Creates the observer.
    pub fn new(bus: Arc<EventBus>, notifier: Arc<WebhookNotifier>) -> Self {
        Self { bus, notifier }
    }

    fn publish_final(&self, session: &UploadSession) {
        let topic = Topic::Upload(session.id);
        self.bus.publish(&topic, PipelineEvent::upload(session));
        self.bus.close_topic(&topic);
    }
}

#[async_trait]
impl UploadObserver for UploadEventObserver {
    async fn on_progress(&self, session: &UploadSession) {
        self.bus
            .publish(&Topic::Upload(session.id), PipelineEvent::upload(session));
    }

    async fn on_completed(&self, session: &UploadSession) {
        self.publish_final(session);
        self.notifier
            .spawn_notify(session.webhook.clone(), WebhookPayload::from_upload(session));
    }

    async fn on_closed(&self, session: &UploadSession) {
        self.publish_final(session);
    }
}
