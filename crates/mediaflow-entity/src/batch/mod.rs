//! Batch domain entities.

pub mod model;
pub mod status;

pub use model::{Batch, BatchMember, MemberOutcome, MemberUpdate, NewBatch};
pub use status::BatchStatus;
