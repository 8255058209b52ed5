//! The external transform collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::artifact::{ArtifactRef, TransformOutput, TransformParams};
use crate::types::kind::OperationKind;

/// Whether a transform failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformErrorKind {
    /// The same input may succeed on a later attempt.
    Transient,
    /// The input can never be transformed.
    Permanent,
}

/// Failure reported by a transform.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransformError {
    /// Retry classification.
    pub kind: TransformErrorKind,
    /// Human-readable reason.
    pub message: String,
}

impl TransformError {
    /// A failure that may succeed on retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A failure that will not succeed on retry.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Whether retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        self.kind == TransformErrorKind::Permanent
    }
}

/// Ordered progress channel handed to a running transform.
///
/// Reports are delivered in the order they were made. Reporting after the
/// job stopped listening is silently ignored.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<u32>,
}

impl ProgressReporter {
    /// Create a reporter and the receiving end the job handler drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a percentage. Values above 100 are clamped by the receiver.
    pub fn report(&self, percent: u32) {
        let _ = self.tx.send(percent);
    }
}

/// An opaque media transformation for one operation kind.
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    /// The operation kind this transform serves.
    fn kind(&self) -> OperationKind;

    /// Transform `input` and store the output.
    async fn transform(
        &self,
        input: &ArtifactRef,
        params: &TransformParams,
        reporter: ProgressReporter,
    ) -> Result<TransformOutput, TransformError>;
}
