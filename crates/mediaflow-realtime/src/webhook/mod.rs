//! Terminal-state callbacks.

pub mod notifier;
pub mod payload;
pub mod sender;

pub use notifier::WebhookNotifier;
pub use payload::{WebhookEvent, WebhookFile, WebhookPayload};
pub use sender::{HttpWebhookSender, WebhookSender};
