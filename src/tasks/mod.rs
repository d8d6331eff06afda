//! Background Tasks Module
//!
//! Periodic work owned through a [`CleanupHandle`].
//!
//! # Tasks
//! - TTL Cleanup: removes expired application cache entries
//! - Retention Sweep: removes cached responses past the retention window

mod cleanup;
mod retention;

pub use cleanup::{spawn_cleanup_task, CleanupHandle};
pub use retention::spawn_retention_task;
