//! Cron scheduler for periodic maintenance tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use mediaflow_core::error::AppError;
use mediaflow_core::result::AppResult;

/// A periodic housekeeping task.
#[async_trait]
pub trait MaintenanceTask: Send + Sync + std::fmt::Debug {
    /// Task name used in logs.
    fn name(&self) -> &str;

    /// Cron expression with a seconds field.
    fn schedule(&self) -> &str;

    /// Run once.
    async fn run(&self) -> AppResult<()>;
}

/// Cron-based scheduler for [`MaintenanceTask`]s
pub struct MaintenanceScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
}

impl std::fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceScheduler").finish()
    }
}

impl MaintenanceScheduler {
    /// Create a new scheduler
    pub async fn new() -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self { scheduler })
    }

    /// Register a task on its schedule
    pub async fn register(&self, task: Arc<dyn MaintenanceTask>) -> AppResult<()> {
        let name = task.name().to_string();
        let schedule = task.schedule().to_string();

        let job_task = Arc::clone(&task);
        let job = CronJob::new_async(schedule.as_str(), move |_uuid, _lock| {
            let task = Arc::clone(&job_task);
            Box::pin(async move {
                tracing::debug!(task = task.name(), "Running maintenance task");
                if let Err(e) = task.run().await {
                    tracing::error!(task = task.name(), error = %e, "Maintenance task failed");
                }
            })
        })
        .map_err(|e| {
            AppError::configuration(format!(
                "Invalid schedule '{}' for task '{}': {}",
                schedule, name, e
            ))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add '{}' schedule: {}", name, e)))?;

        tracing::info!(task = %name, schedule = %schedule, "Registered maintenance task");
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Maintenance scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Maintenance scheduler shut down");
        Ok(())
    }
}
