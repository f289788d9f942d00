//! Test scheduler — records submissions and fires them on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use threadquest_core::error::DomainError;
use threadquest_core::scheduler::{DueTask, HandlerRegistry, Scheduler, TaskHandle, TaskHandler};
use uuid::Uuid;

/// One `schedule` call captured by [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    /// Assigned task id.
    pub task_id: Uuid,
    /// Task kind.
    pub kind: String,
    /// Task payload.
    pub payload: serde_json::Value,
    /// Requested delay.
    pub delay: Duration,
}

/// A scheduler that never fires on its own. Tests inspect the recorded
/// calls and trigger delivery explicitly with [`RecordingScheduler::fire`].
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<ScheduledCall>>,
    registry: HandlerRegistry,
    failing: AtomicBool,
}

impl RecordingScheduler {
    /// Creates a scheduler that accepts every submission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler whose `schedule` always fails.
    #[must_use]
    pub fn failing() -> Self {
        let scheduler = Self::default();
        scheduler.failing.store(true, Ordering::SeqCst);
        scheduler
    }

    /// Returns a snapshot of all submissions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> Vec<ScheduledCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Delivers a recorded task to its registered handler, as a real
    /// scheduler would once the delay elapsed.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or `DomainError::Scheduling` if no
    /// handler is registered for the task's kind.
    pub async fn fire(&self, call: &ScheduledCall, attempt: u32) -> Result<(), DomainError> {
        let handler: Arc<dyn TaskHandler> = self.registry.get(&call.kind).ok_or_else(|| {
            DomainError::Scheduling(format!("no handler registered for {}", call.kind))
        })?;
        let task = DueTask {
            task_id: call.task_id,
            kind: call.kind.clone(),
            payload: call.payload.clone(),
            attempt,
            execute_after: Utc::now(),
        };
        handler.handle(&task).await
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(
        &self,
        kind: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<TaskHandle, DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::Scheduling("queue unavailable".into()));
        }
        let call = ScheduledCall {
            task_id: Uuid::new_v4(),
            kind: kind.to_owned(),
            payload,
            delay,
        };
        let handle = TaskHandle {
            task_id: call.task_id,
            kind: call.kind.clone(),
            execute_after: Utc::now(),
            deduplicated: false,
        };
        self.calls.lock().unwrap().push(call);
        Ok(handle)
    }

    fn on_due(&self, kind: &str, handler: Arc<dyn TaskHandler>) {
        self.registry.register(kind, handler);
    }
}
