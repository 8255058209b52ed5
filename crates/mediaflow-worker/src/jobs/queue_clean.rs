//! Purges old completed and failed queue items.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use mediaflow_core::config::queue::QueueConfig;
use mediaflow_core::result::AppResult;

use crate::queue::QueueRegistry;
use crate::scheduler::MaintenanceTask;

/// Cleans terminal items of every kind
#[derive(Debug)]
pub struct QueueCleanTask {
    queue: Arc<QueueRegistry>,
    older_than: Duration,
    schedule: String,
}

impl QueueCleanTask {
    /// Create the task from queue configuration
    pub fn new(queue: Arc<QueueRegistry>, config: &QueueConfig) -> Self {
        Self {
            queue,
            older_than: Duration::hours(config.clean_older_than_hours),
            schedule: config.clean_schedule.clone(),
        }
    }
}

#[async_trait]
impl MaintenanceTask for QueueCleanTask {
    fn name(&self) -> &str {
        "queue_clean"
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn run(&self) -> AppResult<()> {
        let removed = self.queue.clean_all(self.older_than).await;
        tracing::info!(removed, "Queue clean finished");
        Ok(())
    }
}
