//! End-to-end tests driving a running pipeline with in-memory collaborators.

mod helpers;

mod batch_test;
mod job_test;
mod queue_test;
mod upload_test;
