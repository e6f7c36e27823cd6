//! Database query functions for the `tasks` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ErrorType, Stage, Task, TaskStatus};

/// Errors from task queries.
#[derive(Debug, thiserror::Error)]
pub enum TaskQueryError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("an active task already exists for episode {episode_id} at stage {stage}")]
    Duplicate { episode_id: Uuid, stage: Stage },

    #[error("task {0} was not in the expected state for this operation")]
    Conflict(Uuid),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Insert a new task row in `pending` status.
///
/// A partial unique index on `(episode_id, stage)` over non-terminal
/// statuses enforces that at most one active task exists per episode/stage
/// pair; a violation is reported as [`TaskQueryError::Duplicate`].
pub async fn insert_task<'e, E>(
    executor: E,
    episode_id: Uuid,
    stage: Stage,
    priority: i32,
    max_retries: i32,
    metadata: serde_json::Value,
) -> Result<Task, TaskQueryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (episode_id, stage, priority, max_retries, metadata) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(episode_id)
    .bind(stage)
    .bind(priority)
    .bind(max_retries)
    .bind(metadata)
    .fetch_one(executor)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            TaskQueryError::Duplicate { episode_id, stage }
        }
        _ => TaskQueryError::Db(e),
    })
}

/// Fetch a single task by ID.
pub async fn by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Task>, TaskQueryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(task)
}

/// List all tasks for an episode, ordered by stage then creation time.
pub async fn by_episode(pool: &PgPool, episode_id: Uuid) -> Result<Vec<Task>, TaskQueryError> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE episode_id = $1 ORDER BY created_at ASC",
    )
    .bind(episode_id)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

/// List all tasks with a given status, most recently updated first.
pub async fn by_status(pool: &PgPool, status: TaskStatus) -> Result<Vec<Task>, TaskQueryError> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = $1 ORDER BY updated_at DESC",
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

/// Status counts across all tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub retry_scheduled: i64,
    pub failed: i64,
    pub dead: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Get a summary of task counts by status.
pub async fn counts_by_status(pool: &PgPool) -> Result<TaskCounts, TaskQueryError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status::text, COUNT(*) as cnt FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut counts = TaskCounts::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => counts.pending = *count,
            "processing" => counts.processing = *count,
            "completed" => counts.completed = *count,
            "retry_scheduled" => counts.retry_scheduled = *count,
            "failed" => counts.failed = *count,
            "dead" => counts.dead = *count,
            "cancelled" => counts.cancelled = *count,
            _ => {}
        }
        counts.total += count;
    }
    Ok(counts)
}

/// Atomically claim the next runnable task and mark it `processing`.
///
/// Candidates are `pending` or `retry_scheduled` tasks whose `next_retry_at`
/// has elapsed (or is unset), restricted to `stage` if given. Uses
/// `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent workers never claim the
/// same row, ordered by priority (descending), then age, then id for a
/// deterministic tie-break.
pub async fn claim_next(pool: &PgPool, stage: Option<Stage>) -> Result<Option<Task>, TaskQueryError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET status = 'processing', started_at = NOW(), updated_at = NOW() \
         WHERE id = ( \
             SELECT id FROM tasks \
             WHERE status IN ('pending', 'retry_scheduled') \
               AND (next_retry_at IS NULL OR next_retry_at <= NOW()) \
               AND ($1::text IS NULL OR stage = $1) \
             ORDER BY priority DESC, created_at ASC, id ASC \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         RETURNING *",
    )
    .bind(stage.map(|s| s.to_string()))
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Mark a `processing` task `completed`.
pub async fn complete_task(pool: &PgPool, task_id: Uuid) -> Result<(), TaskQueryError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', completed_at = NOW(), updated_at = NOW(), \
             error_type = NULL, last_error = NULL \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(task_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TaskQueryError::Conflict(task_id));
    }
    Ok(())
}

/// Move a `processing` task back to `retry_scheduled`, incrementing the
/// retry counter and recording when it becomes eligible again.
pub async fn schedule_retry(
    pool: &PgPool,
    task_id: Uuid,
    next_retry_at: DateTime<Utc>,
    last_error: &str,
) -> Result<(), TaskQueryError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'retry_scheduled', \
             retry_count = retry_count + 1, \
             next_retry_at = $1, \
             error_type = 'transient', \
             last_error = $2, \
             updated_at = NOW() \
         WHERE id = $3 AND status = 'processing'",
    )
    .bind(next_retry_at)
    .bind(last_error)
    .bind(task_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TaskQueryError::Conflict(task_id));
    }
    Ok(())
}

/// Move a `processing` task to a terminal failure state.
///
/// `dead` when the handler reported a fatal error or the retry budget is
/// exhausted, otherwise `failed` is used as a non-DLQ terminal state (the
/// caller decides which applies).
pub async fn fail_task(
    pool: &PgPool,
    task_id: Uuid,
    terminal_status: TaskStatus,
    error_type: ErrorType,
    last_error: &str,
) -> Result<(), TaskQueryError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             completed_at = NOW(), \
             error_type = $2, \
             last_error = $3, \
             updated_at = NOW() \
         WHERE id = $4 AND status = 'processing'",
    )
    .bind(terminal_status)
    .bind(error_type)
    .bind(last_error)
    .bind(task_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TaskQueryError::Conflict(task_id));
    }
    Ok(())
}

/// Move a pending task to the front of the queue.
///
/// Assigns `priority = max(priority over all pending tasks) + 1`. Only
/// applies to tasks in `pending` status; an already-claimed or
/// retry-scheduled task cannot be reordered. Returns the new priority.
pub async fn bump(pool: &PgPool, task_id: Uuid) -> Result<i32, TaskQueryError> {
    let row: Option<(i32,)> = sqlx::query_as(
        "UPDATE tasks \
         SET priority = (SELECT COALESCE(MAX(priority), 0) + 1 FROM tasks WHERE status = 'pending'), \
             updated_at = NOW() \
         WHERE id = $1 AND status = 'pending' \
         RETURNING priority",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.map(|(priority,)| priority)
        .ok_or(TaskQueryError::Conflict(task_id))
}

/// Cancel every pending or retry-scheduled task for an episode.
///
/// Does not interrupt a `processing` task -- cancellation is cooperative and
/// advisory only for in-flight work. Returns the number of tasks cancelled.
pub async fn cancel_pipeline(pool: &PgPool, episode_id: Uuid) -> Result<u64, TaskQueryError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'cancelled', completed_at = NOW(), updated_at = NOW() \
         WHERE episode_id = $1 \
           AND status IN ('pending', 'retry_scheduled')",
    )
    .bind(episode_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Re-queue a `dead` task from the dead-letter queue: resets the retry
/// counter and returns it to `pending`.
pub async fn retry_from_dlq<'e, E>(executor: E, task_id: Uuid) -> Result<(), TaskQueryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'pending', \
             retry_count = 0, \
             next_retry_at = NULL, \
             error_type = NULL, \
             last_error = NULL, \
             started_at = NULL, \
             completed_at = NULL, \
             updated_at = NOW() \
         WHERE id = $1 AND status = 'dead'",
    )
    .bind(task_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TaskQueryError::Conflict(task_id));
    }
    Ok(())
}

/// Dismiss a `dead` task as observationally complete, without requeueing it.
///
/// Does not clear the episode failure record -- the operator is asserting
/// "leave this as-is", not "this episode recovered".
pub async fn skip_dlq(pool: &PgPool, task_id: Uuid) -> Result<(), TaskQueryError> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'completed', updated_at = NOW() \
         WHERE id = $1 AND status = 'dead'",
    )
    .bind(task_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TaskQueryError::Conflict(task_id));
    }
    Ok(())
}

/// Mark a `processing` task `cancelled` because it observed a cancellation
/// signal. No chaining and no episode-failure record follow from this.
pub async fn mark_cancelled(pool: &PgPool, task_id: Uuid) -> Result<(), TaskQueryError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'cancelled', completed_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(task_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(TaskQueryError::Conflict(task_id));
    }
    Ok(())
}

/// Reset tasks stuck in `processing` past `stale_before` back to
/// `retry_scheduled` so a worker can pick them up again.
///
/// This is crash recovery: if a worker dies mid-task, the row is left in
/// `processing` forever unless something resets it. Returns the tasks that
/// were reset.
pub async fn recover_orphaned(
    pool: &PgPool,
    stale_before: DateTime<Utc>,
) -> Result<Vec<Task>, TaskQueryError> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'retry_scheduled', \
             next_retry_at = NOW(), \
             last_error = COALESCE(last_error, 'worker lost during processing'), \
             updated_at = NOW() \
         WHERE status = 'processing' AND updated_at < $1 \
         RETURNING *",
    )
    .bind(stale_before)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}
