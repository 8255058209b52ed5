//! Hook notified about upload session progress.

use async_trait::async_trait;

use mediaflow_entity::upload::UploadSession;

/// Receives upload session notifications.
///
/// Calls are made while the session lock is held, so notifications for a
/// session arrive in order and `on_completed` fires exactly once.
/// Implementations must not block; hand slow work to a task.
#[async_trait]
pub trait UploadObserver: Send + Sync + 'static {
    /// A chunk was recorded.
    async fn on_progress(&self, session: &UploadSession);

    /// The session assembled its artifact.
    async fn on_completed(&self, session: &UploadSession);

    /// The session failed, was cancelled or expired.
    async fn on_closed(&self, session: &UploadSession);
}
