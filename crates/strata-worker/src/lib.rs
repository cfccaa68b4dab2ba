//! Strata Worker
//!
//! Background scheduler that re-drives queued and in-progress transfer tasks,
//! and the `strata-worker` daemon that hosts it.

pub mod scheduler;

pub use scheduler::{SchedulerConfig, SchedulerPasses, TransferScheduler};
