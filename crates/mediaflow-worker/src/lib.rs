//! Queue registry, worker pools and maintenance scheduling for MediaFlow.
//!
//! This crate provides:
//! - One priority queue per operation kind with leases, retries and dead-lettering
//! - Worker pools that lease items and dispatch them to handlers
//! - A cron scheduler for periodic maintenance tasks

pub mod backoff;
pub mod executor;
pub mod item;
pub mod jobs;
pub mod queue;
pub mod runner;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use executor::{HandlerRegistry, JobExecutionError, QueueHandler};
pub use item::{DeadLetter, EnqueueOptions, ItemDetail, ItemState, LeasedItem, QueueStats};
pub use queue::{KindSettings, NackOutcome, QueueRegistry, ReapReport};
pub use runner::WorkerPool;
pub use scheduler::{MaintenanceScheduler, MaintenanceTask};
