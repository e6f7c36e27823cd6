//! EpisodeFailureRecorder (component C8): writes the episode-level failure
//! fields when a task's retries are exhausted or a handler raises a fatal
//! error, and clears them once the stage later succeeds.

pub mod repository;

pub use repository::EpisodeRepository;

use sqlx::PgPool;
use uuid::Uuid;

use castqueue_db::models::{EpisodeFailure, ErrorType, Stage};
use castqueue_db::queries::episode_failures;

/// Failure reasons longer than this are truncated with an ellipsis before
/// being persisted.
const MAX_REASON_BYTES: usize = 2048;

/// Record (or overwrite) the failure for an episode at the given stage.
pub async fn record_failure(
    pool: &PgPool,
    episode_id: Uuid,
    stage: Stage,
    reason: &str,
    kind: ErrorType,
) -> Result<EpisodeFailure, sqlx::Error> {
    let truncated = truncate_snippet(reason, MAX_REASON_BYTES);
    episode_failures::set_episode_failure(pool, episode_id, stage, &truncated, kind).await
}

/// Clear a recorded failure for an episode, e.g. once a later attempt at
/// the failed stage succeeds.
pub async fn clear_failure(pool: &PgPool, episode_id: Uuid) -> Result<(), sqlx::Error> {
    episode_failures::clear_episode_failure(pool, episode_id).await
}

/// Look up the current failure record for an episode, if any.
pub async fn get_failure(
    pool: &PgPool,
    episode_id: Uuid,
) -> Result<Option<EpisodeFailure>, sqlx::Error> {
    episode_failures::get_episode_failure(pool, episode_id).await
}

/// Truncate `s` to at most `max_bytes` bytes at a UTF-8 boundary, appending
/// an ellipsis if truncation occurred.
fn truncate_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}
