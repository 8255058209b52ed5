//! # mediaflow-database
//!
//! Concrete repository implementations for all MediaFlow records. The
//! pipeline only talks to the [`Repository`] trait, so a durable backend
//! can replace the in-process one without touching the services.
//!
//! [`Repository`]: mediaflow_core::traits::Repository

pub mod repositories;

pub use repositories::{BatchRepository, JobRepository, MemoryRepository, UploadSessionRepository};
