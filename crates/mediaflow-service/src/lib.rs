//! # mediaflow-service
//!
//! Orchestration layer for MediaFlow. The job service owns the job state
//! machine and the batch coordinator fans batches out over member jobs.
//! The upload observer turns chunked upload progress into events and
//! callbacks. [`Pipeline`] assembles all of them with the queue registry
//! and worker pools; [`CommandTransform`] runs an external program for a
//! configured operation kind.
//!
//! Services follow constructor injection: all dependencies are provided
//! at construction time via `Arc` references.

pub mod batch;
pub mod job;
pub mod pipeline;
pub mod transform;
pub mod upload;

pub use batch::{BatchCoordinator, BatchFanOutHandler, BatchFile, BatchStatistics, CreateBatchRequest};
pub use job::{CreateJobRequest, JobService, TransformJobHandler};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use transform::CommandTransform;
pub use upload::UploadEventObserver;

#[cfg(test)]
pub(crate) mod testing;
