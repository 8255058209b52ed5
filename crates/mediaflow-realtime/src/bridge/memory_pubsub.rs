//! In-memory pub/sub with one broadcast channel per topic.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::channel::types::Topic;
use crate::message::types::PipelineEvent;

/// Best-effort typed event bus.
///
/// Publishing to a topic nobody subscribed to drops the event. Each
/// publisher sends from under its own source lock, so events of one
/// source arrive in order.
#[derive(Debug)]
pub struct EventBus {
    /// Topic → broadcast sender
    topics: DashMap<Topic, broadcast::Sender<PipelineEvent>>,
    /// Buffer size for topics
    buffer_size: usize,
    /// Events handed to at least one subscriber
    published: AtomicU64,
    /// Events published with no subscriber listening
    dropped: AtomicU64,
}

/// Bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Live subscriptions across all topics.
    pub subscribers: usize,
    /// Events delivered to at least one subscriber.
    pub published: u64,
    /// Events without a listener.
    pub dropped: u64,
}

/// A live subscription to one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl Subscription {
    /// The subscribed topic.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next event, or `None` once the topic is closed.
    ///
    /// A subscriber that falls behind the buffer skips the oldest events.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(topic = %self.topic, skipped, "Subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl EventBus {
    /// Create a new bus
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer_size: buffer_size.max(1),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event to a topic
    pub fn publish(&self, topic: &Topic, event: PipelineEvent) {
        let delivered = self
            .topics
            .get(topic)
            .is_some_and(|tx| tx.send(event).is_ok());
        if delivered {
            self.published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Subscribe to a topic
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let receiver = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe();
        tracing::debug!(topic = %topic, "Subscribed");
        Subscription { topic, receiver }
    }

    /// End a subscription, dropping the topic when it was the last one
    pub fn unsubscribe(&self, subscription: Subscription) {
        let Subscription { topic, receiver } = subscription;
        drop(receiver);
        self.topics
            .remove_if(&topic, |_, tx| tx.receiver_count() == 0);
        tracing::debug!(topic = %topic, "Unsubscribed");
    }

    /// Close a topic. Subscribers receive what is buffered, then `None`.
    pub fn close_topic(&self, topic: &Topic) {
        if self.topics.remove(topic).is_some() {
            tracing::debug!(topic = %topic, "Topic closed");
        }
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Counters
    pub fn stats(&self) -> BusStats {
        BusStats {
            topics: self.topics.len(),
            subscribers: self.topics.iter().map(|e| e.value().receiver_count()).sum(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
