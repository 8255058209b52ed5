//! JSON body posted to webhook targets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mediaflow_core::types::{JobId, TransformOutput, TransformParams};
use mediaflow_entity::batch::{Batch, BatchMember};
use mediaflow_entity::job::Job;
use mediaflow_entity::upload::UploadSession;

/// What the callback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEvent {
    /// A standalone job finished.
    Job,
    /// A batch completed or was cancelled.
    Batch,
    /// An upload session assembled its artifact.
    Upload,
}

/// One batch member in a batch callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookFile {
    /// Member job.
    pub job_id: JobId,
    /// Original file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Member status.
    pub status: String,
    /// Member progress.
    pub progress: u8,
    /// Output, when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TransformOutput>,
    /// Failure reason, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&BatchMember> for WebhookFile {
    fn from(member: &BatchMember) -> Self {
        Self {
            job_id: member.job_id,
            filename: member.filename.clone(),
            status: member.status.as_str().to_string(),
            progress: member.progress,
            result: member.result.clone(),
            error: member.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

/// Callback body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Source type.
    pub event: WebhookEvent,
    /// Job, batch or upload id.
    pub id: String,
    /// Terminal status of the source.
    pub status: String,
    /// Final progress.
    pub progress: u8,
    /// Tenant or group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Batch name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Batch member count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    /// Completed batch members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_files: Option<usize>,
    /// Failed batch members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_files: Option<usize>,
    /// Per-member outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<WebhookFile>>,
    /// Parameters the operation ran with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<TransformParams>,
    /// Output descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the source was created.
    pub created_at: DateTime<Utc>,
    /// When the source reached its terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When this payload was built.
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    fn base(event: WebhookEvent, id: String, status: &str, progress: u8, created_at: DateTime<Utc>) -> Self {
        Self {
            event,
            id,
            status: status.to_string(),
            progress,
            tenant_id: None,
            name: None,
            total_files: None,
            processed_files: None,
            failed_files: None,
            files: None,
            params: None,
            result: None,
            error: None,
            created_at,
            completed_at: None,
            timestamp: Utc::now(),
        }
    }

    /// Payload for a standalone job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            tenant_id: job.tenant_id.clone(),
            params: Some(job.params.clone()),
            result: job.result.as_ref().and_then(|r| serde_json::to_value(r).ok()),
            error: job.error.as_ref().map(|e| e.message.clone()),
            completed_at: job.completed_at,
            ..Self::base(
                WebhookEvent::Job,
                job.id.to_string(),
                job.status.as_str(),
                job.progress,
                job.created_at,
            )
        }
    }

    /// Payload for a batch, including every member.
    pub fn from_batch(batch: &Batch) -> Self {
        Self {
            tenant_id: batch.tenant_id.clone(),
            name: Some(batch.name.clone()),
            total_files: Some(batch.total_files),
            processed_files: Some(batch.processed_files),
            failed_files: Some(batch.failed_files),
            files: Some(batch.members.iter().map(WebhookFile::from).collect()),
            params: Some(batch.params.clone()),
            completed_at: batch.completed_at,
            ..Self::base(
                WebhookEvent::Batch,
                batch.id.to_string(),
                batch.status.as_str(),
                batch.progress,
                batch.created_at,
            )
        }
    }

    /// Payload for an upload session.
    pub fn from_upload(session: &UploadSession) -> Self {
        Self {
            result: session.artifact.as_ref().map(|artifact| {
                serde_json::json!({
                    "location": artifact,
                    "filename": session.filename,
                    "contentType": session.content_type,
                    "sizeBytes": session.total_size,
                })
            }),
            error: session.error.clone(),
            completed_at: session.completed_at,
            ..Self::base(
                WebhookEvent::Upload,
                session.id.to_string(),
                session.status.as_str(),
                session.progress(),
                session.created_at,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mediaflow_core::types::{ArtifactRef, OperationKind};
    use mediaflow_entity::batch::NewBatch;
    use mediaflow_entity::job::{JobPriority, NewJob};

    use super::*;

    fn job() -> Job {
        Job::new(
            NewJob {
                batch_id: None,
                input: ArtifactRef::new("uploads/a"),
                kind: OperationKind::new(OperationKind::IMAGE_RESIZE),
                params: TransformParams::new(),
                priority: JobPriority::Normal,
                webhook: None,
                tenant_id: Some("acme".into()),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_job_payload_is_camel_case_and_skips_absent_fields() {
        let payload = WebhookPayload::from_job(&job());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["event"], "job");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["tenantId"], "acme");
        assert!(value.get("totalFiles").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_batch_payload_lists_members() {
        let now = Utc::now();
        let mut batch = Batch::new(
            NewBatch {
                name: "holiday".into(),
                description: None,
                tenant_id: None,
                kind: OperationKind::new(OperationKind::IMAGE_RESIZE),
                params: TransformParams::new(),
                group_size: 3,
                webhook: None,
            },
            now,
        );
        let member = job();
        batch
            .add_members([BatchMember::from_job(&member, Some("a.jpg".into()))], now)
            .unwrap();

        let value = serde_json::to_value(WebhookPayload::from_batch(&batch)).unwrap();
        assert_eq!(value["totalFiles"], 1);
        assert_eq!(value["files"][0]["filename"], "a.jpg");
        assert_eq!(value["files"][0]["jobId"], member.id.to_string());
    }
}
