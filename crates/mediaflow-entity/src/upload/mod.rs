//! Chunked upload session entities.

pub mod session;
pub mod status;

pub use session::{NewUploadSession, UploadSession};
pub use status::UploadStatus;
