//! The Queue's public API (component C6): wraps the Store (C1) and Backoff
//! (C3) behind the operations the Worker and CommandSurface actually call.
//!
//! A thin wrapper per state-machine edge, each one a single `queries::tasks`
//! call (or, where the edge spans two tables, a short sequence of calls).

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use castqueue_db::models::{ErrorType, Stage, Task, TaskStatus};
use castqueue_db::queries::{episode_failures, tasks};
use castqueue_db::queries::tasks::TaskQueryError;
use castqueue_db::tx;

use super::state_machine;

/// Errors surfaced by [`Queue`] operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("an active task already exists for episode {episode_id} at stage {stage}")]
    Duplicate { episode_id: Uuid, stage: Stage },

    #[error("task {0} was not in the expected state for this operation")]
    Conflict(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<TaskQueryError> for QueueError {
    fn from(err: TaskQueryError) -> Self {
        match err {
            TaskQueryError::NotFound(id) => Self::NotFound(id),
            TaskQueryError::Duplicate { episode_id, stage } => Self::Duplicate { episode_id, stage },
            TaskQueryError::Conflict(id) => Self::Conflict(id),
            TaskQueryError::Db(e) => Self::Storage(e),
        }
    }
}

/// The task queue's public API. Cheap to clone (wraps a `PgPool`).
#[derive(Clone)]
pub struct Queue {
    pool: sqlx::PgPool,
}

impl Queue {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers (e.g. the worker) that also need to
    /// drive `castqueue_db::queries::episode_failures` directly.
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub async fn enqueue(
        &self,
        episode_id: Uuid,
        stage: Stage,
        priority: i32,
        max_retries: i32,
        metadata: Value,
    ) -> Result<Task, QueueError> {
        Ok(tasks::insert_task(&self.pool, episode_id, stage, priority, max_retries, metadata).await?)
    }

    pub async fn claim_next(&self, stage: Option<Stage>) -> Result<Option<Task>, QueueError> {
        Ok(tasks::claim_next(&self.pool, stage).await?)
    }

    pub async fn mark_completed(&self, task_id: Uuid) -> Result<(), QueueError> {
        Ok(tasks::complete_task(&self.pool, task_id).await?)
    }

    pub async fn schedule_retry(
        &self,
        task_id: Uuid,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), QueueError> {
        Ok(tasks::schedule_retry(&self.pool, task_id, next_retry_at, last_error).await?)
    }

    pub async fn mark_failed(&self, task_id: Uuid, last_error: &str) -> Result<(), QueueError> {
        Ok(tasks::fail_task(&self.pool, task_id, TaskStatus::Failed, ErrorType::Transient, last_error).await?)
    }

    pub async fn mark_dead(&self, task_id: Uuid, last_error: &str) -> Result<(), QueueError> {
        Ok(tasks::fail_task(&self.pool, task_id, TaskStatus::Dead, ErrorType::Fatal, last_error).await?)
    }

    pub async fn mark_cancelled(&self, task_id: Uuid) -> Result<(), QueueError> {
        Ok(tasks::mark_cancelled(&self.pool, task_id).await?)
    }

    pub async fn bump(&self, task_id: Uuid) -> Result<i32, QueueError> {
        Ok(tasks::bump(&self.pool, task_id).await?)
    }

    pub async fn cancel_pipeline(&self, episode_id: Uuid) -> Result<u64, QueueError> {
        Ok(tasks::cancel_pipeline(&self.pool, episode_id).await?)
    }

    /// `dead -> pending`. Also clears the episode failure record if it was
    /// recorded at the same stage as this task.
    ///
    /// The read, the task reset, and the conditional failure-record clear
    /// run inside a single transaction so a crash between the writes never
    /// leaves the task reset with a stale failure record still attached (or
    /// vice versa).
    pub async fn retry_from_dlq(&self, task_id: Uuid) -> Result<(), QueueError> {
        tx::transaction(&self.pool, move |conn: &mut sqlx::PgConnection| {
            Box::pin(async move {
                let task = tasks::by_id(&mut *conn, task_id)
                    .await?
                    .ok_or(QueueError::NotFound(task_id))?;

                if !state_machine::is_terminal(task.status)
                    || !state_machine::is_valid_transition(task.status, TaskStatus::Pending)
                {
                    return Err(QueueError::Conflict(task_id));
                }

                tasks::retry_from_dlq(&mut *conn, task_id).await?;

                if let Some(failure) = episode_failures::get_episode_failure(&mut *conn, task.episode_id).await? {
                    if failure.failed_at_stage == Some(task.stage) {
                        episode_failures::clear_episode_failure(&mut *conn, task.episode_id).await?;
                    }
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn skip_dlq(&self, task_id: Uuid) -> Result<(), QueueError> {
        Ok(tasks::skip_dlq(&self.pool, task_id).await?)
    }

    /// Retry every task currently in the DLQ. Returns the number retried.
    pub async fn retry_all_dlq(&self) -> Result<u64, QueueError> {
        let dead = tasks::by_status(&self.pool, TaskStatus::Dead).await?;
        let mut count = 0u64;
        for task in dead {
            self.retry_from_dlq(task.id).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Clear the episode's failure record and, if the failed stage is
    /// known, enqueue a fresh task at that stage with `retry_count=0`.
    /// Returns the newly enqueued task, if one was created.
    ///
    /// Runs inside a single transaction: clearing the failure record and
    /// enqueueing the replacement task land together, so a crash in between
    /// never leaves an episode with neither a failure record nor a task to
    /// recover it.
    pub async fn retry_episode(&self, episode_id: Uuid) -> Result<Option<Task>, QueueError> {
        tx::transaction(&self.pool, move |conn: &mut sqlx::PgConnection| {
            Box::pin(async move {
                let failure = episode_failures::get_episode_failure(&mut *conn, episode_id).await?;
                let Some(failure) = failure else {
                    return Ok(None);
                };
                episode_failures::clear_episode_failure(&mut *conn, episode_id).await?;

                let Some(stage) = failure.failed_at_stage else {
                    return Ok(None);
                };
                let task =
                    tasks::insert_task(&mut *conn, episode_id, stage, 0, 3, serde_json::json!({})).await?;
                Ok(Some(task))
            })
        })
        .await
    }

    pub async fn by_id(&self, task_id: Uuid) -> Result<Option<Task>, QueueError> {
        Ok(tasks::by_id(&self.pool, task_id).await?)
    }

    pub async fn by_episode(&self, episode_id: Uuid) -> Result<Vec<Task>, QueueError> {
        Ok(tasks::by_episode(&self.pool, episode_id).await?)
    }

    pub async fn by_status(&self, status: TaskStatus) -> Result<Vec<Task>, QueueError> {
        Ok(tasks::by_status(&self.pool, status).await?)
    }

    pub async fn counts_by_status(&self) -> Result<tasks::TaskCounts, QueueError> {
        Ok(tasks::counts_by_status(&self.pool).await?)
    }

    /// Reset tasks stuck in `processing` past `stale_before` back to
    /// `retry_scheduled`. Run by the worker at startup and optionally on
    /// an interval.
    pub async fn recover_orphaned(&self, stale_before: DateTime<Utc>) -> Result<Vec<Task>, QueueError> {
        Ok(tasks::recover_orphaned(&self.pool, stale_before).await?)
    }
}
