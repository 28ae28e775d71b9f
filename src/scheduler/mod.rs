//! # Periodic Scheduler
//!
//! Time-based root events (mailbox polling and any configured cron or
//! interval entry), published through the same router as every other
//! producer. Exactly one scheduler instance is active at a time.

pub mod entry;
pub mod errors;
pub mod lock;
pub mod periodic;

pub use entry::{ScheduleEntry, ScheduleSpec};
pub use errors::SchedulerError;
pub use lock::{LocalSchedulerLock, PgAdvisoryLock, SchedulerLock};
pub use periodic::{PeriodicScheduler, SchedulerHandle};
