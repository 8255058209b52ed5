//! Queue handler that runs a transform for one job delivery.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mediaflow_core::error::{AppError, codes};
use mediaflow_core::traits::transform::{ProgressReporter, Transform, TransformError};
use mediaflow_core::types::{JobId, OperationKind};
use mediaflow_entity::job::{Job, JobError, JobStatus};
use mediaflow_worker::{DeadLetter, JobExecutionError, LeasedItem, QueueHandler};

use super::service::JobService;

/// Runs the transform of one operation kind.
pub struct TransformJobHandler {
    jobs: Arc<JobService>,
    transform: Arc<dyn Transform>,
}

impl std::fmt::Debug for TransformJobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformJobHandler")
            .field("kind", &self.transform.kind())
            .finish()
    }
}

impl TransformJobHandler {
    /// Creates a handler for the transform's kind.
    pub fn new(jobs: Arc<JobService>, transform: Arc<dyn Transform>) -> Self {
        Self { jobs, transform }
    }
}

/// Extract a typed id field from a queue payload.
pub(crate) fn payload_id<T: std::str::FromStr>(
    payload: &Value,
    field: &str,
) -> Result<T, JobExecutionError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| JobExecutionError::Permanent(format!("Payload has no valid '{field}'")))
}

fn is_terminal_conflict(err: &AppError) -> bool {
    err.has_code(codes::JOB_TERMINAL)
}

/// The write was refused because the job has moved on without this delivery.
fn is_superseded(err: &AppError) -> bool {
    err.has_code(codes::JOB_TERMINAL) || err.has_code(codes::STALE_ATTEMPT)
}

fn result_value(job: &Job) -> Value {
    serde_json::json!({
        "jobId": job.id,
        "status": job.status,
        "result": job.result,
    })
}

impl TransformJobHandler {
    /// Answers a delivery of a job that already reached a terminal status.
    async fn finished_delivery(&self, job_id: JobId) -> Result<Option<Value>, JobExecutionError> {
        let job = self.jobs.get(job_id).await?;
        if job.status == JobStatus::Completed {
            tracing::info!(job_id = %job_id, "Job already completed, skipping delivery");
            return Ok(Some(result_value(&job)));
        }
        Err(JobExecutionError::Permanent(format!(
            "Job {job_id} is already {}",
            job.status
        )))
    }

    async fn run_attempt(
        &self,
        item: &LeasedItem,
        job: Job,
        delivery: u64,
    ) -> Result<Option<Value>, JobExecutionError> {
        let job_id = job.id;
        let (reporter, mut progress) = ProgressReporter::channel();
        let execution = self.transform.transform(&job.input, &job.params, reporter);
        tokio::pin!(execution);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(percent) = progress.recv() => {
                    if let Err(e) = self.jobs.report_progress(job_id, delivery, percent).await {
                        tracing::debug!(job_id = %job_id, error = %e, "Dropping progress report");
                    }
                }
                outcome = &mut execution => break outcome,
            }
        };
        while let Ok(percent) = progress.try_recv() {
            let _ = self.jobs.report_progress(job_id, delivery, percent).await;
        }

        match outcome {
            Ok(output) => match self.jobs.complete(job_id, delivery, output).await {
                Ok(job) => Ok(Some(result_value(&job))),
                Err(e) if is_superseded(&e) => {
                    tracing::info!(job_id = %job_id, delivery, "Discarding result of a superseded delivery");
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            },
            Err(err) => {
                if err.is_permanent() || item.is_final_attempt() {
                    let message = err.message.clone();
                    match self
                        .jobs
                        .fail_attempt(job_id, delivery, JobError::from(err))
                        .await
                    {
                        Ok(_) => {}
                        Err(e) if is_superseded(&e) => {
                            tracing::info!(job_id = %job_id, delivery, "Discarding failure of a superseded delivery");
                        }
                        Err(e) => return Err(e.into()),
                    }
                    Err(JobExecutionError::Permanent(message))
                } else {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt = item.attempt,
                        max_attempts = item.max_attempts,
                        error = %err.message,
                        "Transform failed, will retry"
                    );
                    Err(JobExecutionError::Transient(err.message))
                }
            }
        }
    }
}

#[async_trait]
impl QueueHandler for TransformJobHandler {
    fn kind(&self) -> OperationKind {
        self.transform.kind()
    }

    async fn handle(&self, item: &LeasedItem) -> Result<Option<Value>, JobExecutionError> {
        let job_id: JobId = payload_id(&item.payload, "jobId")?;
        let delivery = item.delivery();

        let job = match self.jobs.begin_attempt(job_id, delivery).await {
            Ok(job) => job,
            Err(e) if is_terminal_conflict(&e) => return self.finished_delivery(job_id).await,
            Err(e) if e.has_code(codes::ATTEMPT_IN_PROGRESS) => {
                tracing::warn!(job_id = %job_id, delivery, "Previous delivery still running, backing off");
                return Err(JobExecutionError::Transient(e.message));
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = self.run_attempt(item, job, delivery).await;
        self.jobs.end_attempt(job_id, delivery);
        outcome
    }

    async fn on_dead_letter(&self, item: &DeadLetter) {
        let Ok(job_id) = payload_id::<JobId>(&item.payload, "jobId") else {
            return;
        };
        let error = TransformError::transient(item.error.clone());
        match self.jobs.fail(job_id, JobError::from(error)).await {
            Ok(_) => tracing::warn!(job_id = %job_id, error = %item.error, "Queue gave up on job"),
            Err(e) if is_terminal_conflict(&e) => {}
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record dead-lettered job"),
        }
    }
}
