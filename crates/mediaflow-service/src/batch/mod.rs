//! Batch coordination.

pub mod coordinator;
pub mod handler;

pub use coordinator::{BatchCoordinator, BatchFile, BatchStatistics, CreateBatchRequest};
pub use handler::BatchFanOutHandler;
