//! Queue items, leases and their administrative views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mediaflow_core::types::{OperationKind, QueueItemId};

use crate::backoff::BackoffPolicy;

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Ready to be leased.
    Waiting,
    /// Waiting for its backoff or initial delay to elapse.
    Delayed,
    /// Leased by a worker.
    Active,
    /// Acknowledged.
    Completed,
    /// Dead-lettered: attempts exhausted or non-retryable failure.
    Failed,
}

impl ItemState {
    /// Whether the item will never be delivered again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Options for [`QueueRegistry::enqueue`](crate::queue::QueueRegistry::enqueue).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Higher is leased first; FIFO within equal priority.
    pub priority: u8,
    /// Overrides the kind's attempt budget.
    pub max_attempts: Option<u32>,
    /// Overrides the kind's backoff policy.
    pub backoff: Option<BackoffPolicy>,
    /// Keep the item delayed for this long before it becomes waiting.
    pub delay: Option<std::time::Duration>,
}

impl EnqueueOptions {
    /// Options with the given priority.
    pub fn with_priority(priority: u8) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// An item as stored by the registry.
#[derive(Debug, Clone)]
pub(crate) struct QueueItem {
    pub id: QueueItemId,
    pub payload: Value,
    pub priority: u8,
    pub seq: u64,
    pub state: ItemState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub enqueued_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub lease: Option<Lease>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Lease {
    pub token: u64,
    pub deadline: DateTime<Utc>,
}

/// An item handed to a worker. Acknowledge or fail it through the registry.
#[derive(Debug, Clone)]
pub struct LeasedItem {
    /// Item identifier.
    pub id: QueueItemId,
    /// Queue kind.
    pub kind: OperationKind,
    /// Opaque payload.
    pub payload: Value,
    /// 1-based attempt number of this delivery.
    pub attempt: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    pub(crate) token: u64,
}

impl LeasedItem {
    /// Whether a failure of this delivery dead-letters the item.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Identifies this delivery. Unique across the registry, so a
    /// redelivery of the same item gets a different value.
    pub fn delivery(&self) -> u64 {
        self.token
    }
}

/// An item that moved to the failed state.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Item identifier.
    pub id: QueueItemId,
    /// Queue kind.
    pub kind: OperationKind,
    /// Opaque payload.
    pub payload: Value,
    /// Last failure reason.
    pub error: String,
}

impl DeadLetter {
    /// Describe a delivery whose failure dead-lettered its item.
    pub fn from_delivery(item: &LeasedItem, error: impl Into<String>) -> Self {
        Self {
            id: item.id,
            kind: item.kind.clone(),
            payload: item.payload.clone(),
            error: error.into(),
        }
    }
}

/// Administrative view of an item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetail {
    /// Item identifier.
    pub id: QueueItemId,
    /// Queue kind.
    pub kind: OperationKind,
    /// Current state.
    pub state: ItemState,
    /// Opaque payload.
    pub payload: Value,
    /// Priority.
    pub priority: u8,
    /// Attempts made so far.
    pub attempts_made: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Last failure reason.
    pub failed_reason: Option<String>,
    /// Value returned by the handler on success.
    pub return_value: Option<Value>,
    /// When the item was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the item becomes (or became) available.
    pub available_at: DateTime<Utc>,
    /// When the item completed or was dead-lettered.
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub(crate) fn detail(&self, kind: &OperationKind) -> ItemDetail {
        ItemDetail {
            id: self.id,
            kind: kind.clone(),
            state: self.state,
            payload: self.payload.clone(),
            priority: self.priority,
            attempts_made: self.attempts_made,
            max_attempts: self.max_attempts,
            failed_reason: self.last_error.clone(),
            return_value: self.result.clone(),
            enqueued_at: self.enqueued_at,
            available_at: self.available_at,
            finished_at: self.finished_at,
        }
    }
}

/// Per-kind counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items ready to lease.
    pub waiting: usize,
    /// Items currently leased.
    pub active: usize,
    /// Acknowledged items not yet cleaned.
    pub completed: usize,
    /// Dead-lettered items not yet cleaned.
    pub failed: usize,
    /// Items waiting for a delay to elapse.
    pub delayed: usize,
    /// Whether leasing is paused.
    pub paused: bool,
}
