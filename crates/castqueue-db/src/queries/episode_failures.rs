//! Database query functions for the `episode_failures` table.
//!
//! This table holds the most recent failure, if any, for each episode -- a
//! small denormalized summary that lets callers answer "is this episode
//! currently stuck?" without scanning `tasks`.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{EpisodeFailure, ErrorType, Stage};

/// Record (or overwrite) the failure for an episode.
///
/// Upserts on `episode_id`, so re-recording a failure for the same episode
/// simply updates the existing row.
pub async fn set_episode_failure(
    pool: &PgPool,
    episode_id: Uuid,
    failed_at_stage: Stage,
    failure_reason: &str,
    failure_type: ErrorType,
) -> Result<EpisodeFailure, sqlx::Error> {
    sqlx::query_as::<_, EpisodeFailure>(
        "INSERT INTO episode_failures (episode_id, failed_at_stage, failure_reason, failure_type, failed_at) \
         VALUES ($1, $2, $3, $4, NOW()) \
         ON CONFLICT (episode_id) DO UPDATE \
         SET failed_at_stage = EXCLUDED.failed_at_stage, \
             failure_reason = EXCLUDED.failure_reason, \
             failure_type = EXCLUDED.failure_type, \
             failed_at = EXCLUDED.failed_at \
         RETURNING *",
    )
    .bind(episode_id)
    .bind(failed_at_stage)
    .bind(failure_reason)
    .bind(failure_type)
    .fetch_one(pool)
    .await
}

/// Clear a recorded failure for an episode (e.g. once it has been retried
/// successfully). A no-op if no failure was recorded.
pub async fn clear_episode_failure<'e, E>(executor: E, episode_id: Uuid) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query("DELETE FROM episode_failures WHERE episode_id = $1")
        .bind(episode_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Fetch the recorded failure for an episode, if any.
pub async fn get_episode_failure<'e, E>(
    executor: E,
    episode_id: Uuid,
) -> Result<Option<EpisodeFailure>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, EpisodeFailure>("SELECT * FROM episode_failures WHERE episode_id = $1")
        .bind(episode_id)
        .fetch_optional(executor)
        .await
}

/// List every episode with a recorded failure, most recent first.
pub async fn list_episode_failures(pool: &PgPool) -> Result<Vec<EpisodeFailure>, sqlx::Error> {
    sqlx::query_as::<_, EpisodeFailure>(
        "SELECT * FROM episode_failures ORDER BY failed_at DESC NULLS LAST",
    )
    .fetch_all(pool)
    .await
}
