//! Repository implementations for all MediaFlow records.

pub mod memory;

use mediaflow_entity::batch::Batch;
use mediaflow_entity::job::Job;
use mediaflow_entity::upload::UploadSession;

pub use memory::MemoryRepository;

/// Repository for transform jobs.
pub type JobRepository = MemoryRepository<Job>;

/// Repository for batches.
pub type BatchRepository = MemoryRepository<Batch>;

/// Repository for upload sessions.
pub type UploadSessionRepository = MemoryRepository<UploadSession>;
