//! PostgreSQL-backed durable task queue.
//!
//! Tasks survive restarts. Workers claim due rows with
//! `FOR UPDATE SKIP LOCKED` and hold them under a lease; a worker that dies
//! mid-task lets the lease expire and another worker picks the task up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Row};
use threadquest_core::clock::Clock;
use threadquest_core::error::DomainError;
use threadquest_core::scheduler::{DueTask, HandlerRegistry, Scheduler, TaskHandle, TaskHandler};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::dedupe::dedupe_key;
use crate::retry::RetryPolicy;

/// Worker tuning for [`PgTaskQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep between polls when nothing was due.
    pub poll_interval: Duration,
    /// How long a claimed task is reserved for its worker.
    pub lease: Duration,
    /// Maximum tasks claimed per poll.
    pub batch_size: u32,
    /// Redelivery policy for failed tasks.
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(300),
            batch_size: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// A claimed row.
struct ClaimedTask {
    task: DueTask,
    max_attempts: u32,
}

/// Durable scheduler over the `scheduled_tasks` table.
pub struct PgTaskQueue {
    pool: PgPool,
    registry: HandlerRegistry,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    wake: Notify,
}

fn db_error(e: sqlx::Error) -> DomainError {
    DomainError::Scheduling(format!("database error: {e}"))
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

impl PgTaskQueue {
    /// Creates a queue over `pool`.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, config: WorkerConfig) -> Self {
        Self {
            pool,
            registry: HandlerRegistry::new(),
            clock,
            config,
            wake: Notify::new(),
        }
    }

    /// Returns the open task for `key`, if any.
    async fn find_open(&self, key: &str) -> Result<Option<TaskHandle>, DomainError> {
        let row = sqlx::query(
            "SELECT id, kind, execute_after FROM scheduled_tasks \
             WHERE dedupe_key = $1 AND status IN ('pending', 'running')",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| TaskHandle {
            task_id: row.get("id"),
            kind: row.get("kind"),
            execute_after: row.get("execute_after"),
            deduplicated: true,
        }))
    }

    /// Claims up to `batch_size` due tasks, including running tasks whose
    /// lease has expired.
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<ClaimedTask>, DomainError> {
        let locked_until = now + to_delta(self.config.lease);
        let limit = i64::from(self.config.batch_size);

        let rows = sqlx::query(
            "UPDATE scheduled_tasks \
             SET status = 'running', attempts = attempts + 1, locked_until = $2, updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM scheduled_tasks \
                 WHERE (status = 'pending' AND execute_after <= $1) \
                    OR (status = 'running' AND locked_until < $1) \
                 ORDER BY execute_after \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, kind, payload, attempts, max_attempts, execute_after",
        )
        .bind(now)
        .bind(locked_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let attempts: i32 = row.get("attempts");
                let max_attempts: i32 = row.get("max_attempts");
                ClaimedTask {
                    task: DueTask {
                        task_id: row.get("id"),
                        kind: row.get("kind"),
                        payload: row.get("payload"),
                        attempt: u32::try_from(attempts).unwrap_or(0),
                        execute_after: row.get("execute_after"),
                    },
                    max_attempts: u32::try_from(max_attempts).unwrap_or(1),
                }
            })
            .collect())
    }

    async fn mark_completed(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE scheduled_tasks \
             SET status = 'completed', locked_until = NULL, last_error = NULL, updated_at = $2 \
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Puts a failed task back in line, or marks it failed when it has used
    /// up its attempts.
    async fn mark_failed(
        &self,
        claimed: &ClaimedTask,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let policy = RetryPolicy {
            max_attempts: claimed.max_attempts,
            ..self.config.retry
        };
        let task = &claimed.task;

        match policy.next_delay(task.attempt) {
            Some(backoff) => {
                warn!(task_id = %task.task_id, attempt = task.attempt, error = reason, ?backoff, "task failed, retrying");
                sqlx::query(
                    "UPDATE scheduled_tasks \
                     SET status = 'pending', execute_after = $2, locked_until = NULL, \
                         last_error = $3, updated_at = $4 \
                     WHERE id = $1",
                )
                .bind(task.task_id)
                .bind(now + to_delta(backoff))
                .bind(reason)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            }
            None => {
                error!(task_id = %task.task_id, attempt = task.attempt, error = reason, "task failed, giving up");
                sqlx::query(
                    "UPDATE scheduled_tasks \
                     SET status = 'failed', locked_until = NULL, last_error = $2, updated_at = $3 \
                     WHERE id = $1",
                )
                .bind(task.task_id)
                .bind(reason)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            }
        }
        Ok(())
    }

    async fn process(&self, claimed: &ClaimedTask) -> Result<(), DomainError> {
        let task = &claimed.task;

        // A lease that expired on the final attempt means the worker died
        // holding it; do not run the task again.
        if task.attempt > claimed.max_attempts {
            return self
                .mark_failed(claimed, "lease expired on final attempt", self.clock.now())
                .await;
        }

        let Some(handler) = self.registry.get(&task.kind) else {
            let reason = format!("no handler registered for {}", task.kind);
            return self.mark_failed(claimed, &reason, self.clock.now()).await;
        };

        match handler.handle(task).await {
            Ok(()) => {
                debug!(task_id = %task.task_id, attempt = task.attempt, "task completed");
                self.mark_completed(task.task_id, self.clock.now()).await
            }
            Err(e) => {
                self.mark_failed(claimed, &e.to_string(), self.clock.now())
                    .await
            }
        }
    }

    /// Claims and runs every task due now. Returns how many were processed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Scheduling` if due tasks cannot be claimed.
    /// Handler failures are recorded on the task; a task whose outcome
    /// cannot be recorded is logged and left to its lease.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize, DomainError> {
        let claimed = self.claim_due(self.clock.now()).await?;
        for task in &claimed {
            if let Err(e) = self.process(task).await {
                error!(
                    task_id = %task.task.task_id,
                    kind = %task.task.kind,
                    error = %e,
                    "task outcome not recorded"
                );
            }
        }
        Ok(claimed.len())
    }

    /// Polls for due tasks until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(kinds = ?self.registry.kinds(), "task worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let processed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "task poll failed");
                    0
                }
            };
            if processed > 0 {
                continue;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.wake.notified() => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("task worker stopped");
    }
}

#[async_trait]
impl Scheduler for PgTaskQueue {
    #[instrument(skip(self, payload))]
    async fn schedule(
        &self,
        kind: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<TaskHandle, DomainError> {
        let key = dedupe_key(kind, &payload);
        let max_attempts = i32::try_from(self.config.retry.max_attempts).unwrap_or(i32::MAX);

        // The open task can finish between a lost insert and the lookup, so
        // try the pair twice before giving up.
        for _ in 0..2 {
            let now = self.clock.now();
            let task_id = Uuid::new_v4();
            let execute_after = self.clock.after(delay);

            let inserted = sqlx::query(
                "INSERT INTO scheduled_tasks \
                     (id, kind, payload, dedupe_key, status, execute_after, max_attempts, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $7) \
                 ON CONFLICT (dedupe_key) WHERE status IN ('pending', 'running') DO NOTHING",
            )
            .bind(task_id)
            .bind(kind)
            .bind(&payload)
            .bind(&key)
            .bind(execute_after)
            .bind(max_attempts)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected()
                == 1;

            if inserted {
                self.wake.notify_one();
                debug!(%task_id, kind, ?delay, "task scheduled");
                return Ok(TaskHandle {
                    task_id,
                    kind: kind.to_owned(),
                    execute_after,
                    deduplicated: false,
                });
            }

            if let Some(existing) = self.find_open(&key).await? {
                debug!(task_id = %existing.task_id, kind, "task already pending");
                return Ok(existing);
            }
        }

        Err(DomainError::Scheduling(format!(
            "could not schedule {kind}: dedupe key kept changing state"
        )))
    }

    fn on_due(&self, kind: &str, handler: Arc<dyn TaskHandler>) {
        self.registry.register(kind, handler);
    }
}
