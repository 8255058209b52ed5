//! Transforms backed by external programs.

pub mod command;

pub use command::CommandTransform;
