//! Threadquest — delayed task scheduling.
//!
//! Two `Scheduler` implementations share the same delivery rules: a task
//! never runs before its delay elapses, may run late, and may run more than
//! once. Re-submitting a task that is still open returns the existing
//! handle.

pub mod dedupe;
pub mod in_process;
pub mod pg_task_queue;
pub mod retry;

pub use dedupe::dedupe_key;
pub use in_process::InProcessScheduler;
pub use pg_task_queue::{PgTaskQueue, WorkerConfig};
pub use retry::RetryPolicy;
