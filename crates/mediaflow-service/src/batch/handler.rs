//! Queue handler for the batch fan-out queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mediaflow_core::types::{BatchId, OperationKind};
use mediaflow_worker::{JobExecutionError, LeasedItem, QueueHandler};

use super::coordinator::BatchCoordinator;
use crate::job::handler::payload_id;

/// Runs [`BatchCoordinator::run_fan_out`] for each queued batch.
#[derive(Debug)]
pub struct BatchFanOutHandler {
    batches: Arc<BatchCoordinator>,
}

impl BatchFanOutHandler {
    /// Creates the handler.
    pub fn new(batches: Arc<BatchCoordinator>) -> Self {
        Self { batches }
    }
}

#[async_trait]
impl QueueHandler for BatchFanOutHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::batch()
    }

    async fn handle(&self, item: &LeasedItem) -> Result<Option<Value>, JobExecutionError> {
        let batch_id: BatchId = payload_id(&item.payload, "batchId")?;
        let batch = self.batches.run_fan_out(batch_id).await?;
        Ok(Some(serde_json::json!({
            "batchId": batch.id,
            "status": batch.status,
            "totalFiles": batch.total_files,
            "processedFiles": batch.processed_files,
            "failedFiles": batch.failed_files,
        })))
    }
}
