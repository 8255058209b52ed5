//! Expires stale upload sessions and purges old ones.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use mediaflow_core::result::AppResult;
use mediaflow_storage::UploadSessionManager;

use crate::scheduler::MaintenanceTask;

/// Runs [`UploadSessionManager::sweep_expired`] on a schedule
#[derive(Debug)]
pub struct UploadSweepTask {
    uploads: Arc<UploadSessionManager>,
    schedule: String,
}

impl UploadSweepTask {
    /// Create the task
    pub fn new(uploads: Arc<UploadSessionManager>, schedule: impl Into<String>) -> Self {
        Self {
            uploads,
            schedule: schedule.into(),
        }
    }
}

#[async_trait]
impl MaintenanceTask for UploadSweepTask {
    fn name(&self) -> &str {
        "upload_sweep"
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn run(&self) -> AppResult<()> {
        let report = self.uploads.sweep_expired(Utc::now()).await?;
        if report.expired > 0 || report.purged > 0 {
            tracing::info!(
                expired = report.expired,
                purged = report.purged,
                "Upload sweep finished"
            );
        }
        Ok(())
    }
}
