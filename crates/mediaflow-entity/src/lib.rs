//! # mediaflow-entity
//!
//! Domain records for MediaFlow. Every struct in this crate is a record the
//! persistence collaborator stores or a value object embedded in one. The
//! lifecycle rules (which transitions are legal, how progress and batch
//! aggregates move) live on the records themselves so every service
//! applies them the same way.

pub mod batch;
pub mod job;
pub mod upload;
pub mod webhook;

pub use webhook::WebhookTarget;
