//! In-process scheduler backed by tokio timers.
//!
//! Tasks live only in memory: a restart loses them, and the recovery scan
//! re-creates whatever is still needed. Suitable for single-process
//! deployments and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use threadquest_core::clock::Clock;
use threadquest_core::error::DomainError;
use threadquest_core::scheduler::{DueTask, HandlerRegistry, Scheduler, TaskHandle, TaskHandler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dedupe::dedupe_key;
use crate::retry::RetryPolicy;

/// Runs each task on its own tokio timer.
pub struct InProcessScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    registry: HandlerRegistry,
    /// Open tasks keyed by dedupe key.
    pending: Mutex<HashMap<String, TaskHandle>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl InProcessScheduler {
    /// Creates a scheduler with no handlers registered.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: HandlerRegistry::new(),
                pending: Mutex::new(HashMap::new()),
                clock,
                retry,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Number of tasks scheduled or running.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops every waiting task and refuses new ones. Handlers already
    /// running are left to finish.
    pub fn shutdown(&self) {
        info!(pending = self.pending_count(), "in-process scheduler shutting down");
        self.inner.cancel.cancel();
    }
}

#[async_trait]
impl Scheduler for InProcessScheduler {
    async fn schedule(
        &self,
        kind: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<TaskHandle, DomainError> {
        if self.inner.cancel.is_cancelled() {
            return Err(DomainError::Scheduling("scheduler is shut down".into()));
        }

        let key = dedupe_key(kind, &payload);
        let handle = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = pending.get(&key) {
                debug!(task_id = %existing.task_id, kind, "task already pending");
                return Ok(TaskHandle {
                    deduplicated: true,
                    ..existing.clone()
                });
            }
            let handle = TaskHandle {
                task_id: Uuid::new_v4(),
                kind: kind.to_owned(),
                execute_after: self.inner.clock.after(delay),
                deduplicated: false,
            };
            pending.insert(key.clone(), handle.clone());
            handle
        };

        let task = DueTask {
            task_id: handle.task_id,
            kind: handle.kind.clone(),
            payload,
            attempt: 1,
            execute_after: handle.execute_after,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.deliver(key, task, delay));

        debug!(task_id = %handle.task_id, kind, ?delay, "task scheduled");
        Ok(handle)
    }

    fn on_due(&self, kind: &str, handler: Arc<dyn TaskHandler>) {
        self.inner.registry.register(kind, handler);
    }
}

impl Inner {
    async fn deliver(self: Arc<Self>, key: String, mut task: DueTask, delay: Duration) {
        let mut wait = delay;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!(task_id = %task.task_id, "task dropped on shutdown");
                    break;
                }
                () = tokio::time::sleep(wait) => {}
            }

            let Some(handler) = self.registry.get(&task.kind) else {
                warn!(task_id = %task.task_id, kind = %task.kind, "no handler registered, dropping task");
                break;
            };

            match handler.handle(&task).await {
                Ok(()) => {
                    debug!(task_id = %task.task_id, attempt = task.attempt, "task completed");
                    break;
                }
                Err(e) => match self.retry.next_delay(task.attempt) {
                    Some(backoff) => {
                        warn!(task_id = %task.task_id, attempt = task.attempt, error = %e, ?backoff, "task failed, retrying");
                        task.attempt += 1;
                        wait = backoff;
                    }
                    None => {
                        error!(task_id = %task.task_id, attempt = task.attempt, error = %e, "task failed, giving up");
                        break;
                    }
                },
            }
        }

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }
}
