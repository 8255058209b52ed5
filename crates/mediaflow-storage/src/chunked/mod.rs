//! Chunked upload handling.

pub mod assembler;
pub mod cleanup;
pub mod manager;
pub mod observer;
pub mod writer;

pub use assembler::ChunkAssembler;
pub use cleanup::ChunkCleanup;
pub use manager::{InitUpload, SweepReport, UploadProgress, UploadSessionManager};
pub use observer::UploadObserver;
pub use writer::ChunkWriter;
