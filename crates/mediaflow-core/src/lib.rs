//! # mediaflow-core
//!
//! Core crate for MediaFlow. Contains the collaborator traits the pipeline
//! is written against (artifact storage, persistence, transforms),
//! configuration schemas, typed identifiers, and the unified error system.
//!
//! This crate has **no** internal dependencies on other MediaFlow crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
