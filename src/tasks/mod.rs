//! Background tasks — single-flight per-user job orchestration.
//!
//! - `record` — Task record, status machine and events
//! - `job` — The `Job` trait and progress reporting
//! - `orchestrator` — Scheduling, cancellation, cleanup and stats

pub mod job;
pub mod orchestrator;
pub mod record;

pub use job::{Job, ProgressReporter};
pub use orchestrator::{TaskOrchestrator, spawn_cleanup_task};
pub use record::{TaskEvent, TaskId, TaskObserver, TaskRecord, TaskStats, TaskStatus};
