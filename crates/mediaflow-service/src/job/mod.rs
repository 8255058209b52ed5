//! Job state machine service and its queue handler.

pub mod handler;
pub mod service;

pub use handler::TransformJobHandler;
pub use service::{CreateJobRequest, JobService};
