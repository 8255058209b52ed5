//! Transform job domain entities.

pub mod model;
pub mod status;

pub use model::{Job, JobError, NewJob, ProgressOutcome};
pub use status::{JobPriority, JobStatus};
