//! Orphan file cleanup
//!
//! [`CleanupService`] performs one sweep; [`CleanupScheduler`] runs sweeps on a
//! fixed interval in a single background task.

mod scheduler;
mod service;

pub use scheduler::{CleanupScheduler, SchedulerState};
pub use service::CleanupService;
