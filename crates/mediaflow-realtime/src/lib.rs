//! # mediaflow-realtime
//!
//! Progress propagation for MediaFlow:
//!
//! - A typed, best-effort event bus with one topic per job, batch, tenant
//!   group and upload session
//! - Terminal-state webhook callbacks with a shared-secret header

pub mod bridge;
pub mod channel;
pub mod message;
pub mod webhook;

pub use bridge::{BusStats, EventBus, Subscription};
pub use channel::Topic;
pub use message::PipelineEvent;
pub use webhook::{HttpWebhookSender, WebhookNotifier, WebhookPayload, WebhookSender};
pub use webhook::sender::RecordingWebhookSender;
