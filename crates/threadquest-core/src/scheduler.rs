//! Delayed task scheduler contract.
//!
//! A scheduler runs a named task with a JSON payload after a delay. Delivery
//! is at-least-once: a task never fires before its delay has elapsed, may
//! fire late, and may fire more than once. Handlers must be idempotent.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;

/// Receipt for a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Task identifier.
    pub task_id: Uuid,
    /// Task kind (queue name).
    pub kind: String,
    /// Earliest time the task may fire.
    pub execute_after: DateTime<Utc>,
    /// `true` if an identical pending task already existed and was reused.
    pub deduplicated: bool,
}

/// A task whose delay has elapsed.
#[derive(Debug, Clone, PartialEq)]
pub struct DueTask {
    /// Task identifier.
    pub task_id: Uuid,
    /// Task kind (queue name).
    pub kind: String,
    /// Task payload.
    pub payload: serde_json::Value,
    /// 1-based delivery attempt.
    pub attempt: u32,
    /// When the task became due.
    pub execute_after: DateTime<Utc>,
}

/// Handles due tasks of one kind.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Processes a due task. An error asks the scheduler to deliver again.
    async fn handle(&self, task: &DueTask) -> Result<(), DomainError>;
}

/// Submits delayed tasks and dispatches them to registered handlers.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submits `payload` to run as `kind` once `delay` has elapsed.
    async fn schedule(
        &self,
        kind: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<TaskHandle, DomainError>;

    /// Registers the handler invoked when a task of `kind` is due.
    fn on_due(&self, kind: &str, handler: Arc<dyn TaskHandler>);
}

/// Handler lookup shared by scheduler implementations.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register(&self, kind: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.to_owned(), handler);
    }

    /// Returns the handler for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    /// Registered kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
