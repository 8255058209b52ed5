//! Events carried on the bus.

pub mod types;

pub use types::PipelineEvent;
