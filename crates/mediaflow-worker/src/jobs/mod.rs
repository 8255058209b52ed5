//! Built-in maintenance tasks.

pub mod queue_clean;
pub mod upload_sweep;

pub use queue_clean::QueueCleanTask;
pub use upload_sweep::UploadSweepTask;
