//! In-process event bus.

pub mod memory_pubsub;

pub use memory_pubsub::{BusStats, EventBus, Subscription};
