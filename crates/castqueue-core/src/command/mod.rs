//! CommandSurface (component C9): the thin adapter external callers (CLI,
//! HTTP) go through instead of touching [`Queue`] directly. Enforces the
//! validation rules in spec.md §4.9/§7 that belong above the Store's own
//! at-most-one-active-task guarantee.

use std::sync::Arc;

use castqueue_db::models::{Stage, Task};
use uuid::Uuid;

use crate::episode::EpisodeRepository;
use crate::pipeline;
use crate::progress::{ProgressBus, ProgressEvent};
use crate::queue::{Queue, QueueError};

/// The validation/failure taxonomy surfaced to external callers, matching
/// spec.md §7's "validation" category plus a passthrough for storage
/// errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("episode is not in the prerequisite state for this operation")]
    WrongState,

    #[error("an active task already exists for this episode and stage")]
    AlreadyQueued,

    #[error("unrecognized stage name: {0}")]
    UnknownStage(String),

    #[error("episode or task not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<QueueError> for CommandError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(_) => Self::NotFound,
            QueueError::Duplicate { .. } => Self::AlreadyQueued,
            QueueError::Conflict(_) => Self::WrongState,
            QueueError::Storage(e) => Self::Storage(e.into()),
        }
    }
}

/// Default `max_retries` for tasks this surface enqueues, per spec.md §6.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Translates external requests into [`Queue`] operations, holding the
/// episode-state lookup and progress bus every method needs.
#[derive(Clone)]
pub struct CommandSurface {
    queue: Queue,
    episodes: Arc<dyn EpisodeRepository>,
    progress: Arc<ProgressBus>,
    default_max_retries: i32,
}

impl CommandSurface {
    pub fn new(
        pool: sqlx::PgPool,
        episodes: Arc<dyn EpisodeRepository>,
        progress: Arc<ProgressBus>,
    ) -> Self {
        Self {
            queue: Queue::new(pool),
            episodes,
            progress,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Enqueue a single stage for an episode.
    ///
    /// Fails with `WrongState` unless the episode's current artifact state
    /// matches `stage`'s precondition, and with `AlreadyQueued` if an
    /// active task for that (episode, stage) pair already exists -- the
    /// latter is detected via the Store's unique-constraint mapping rather
    /// than a pre-check-then-insert race.
    pub async fn enqueue_stage(&self, episode_id: Uuid, stage: Stage) -> Result<Task, CommandError> {
        self.require_precondition(episode_id, stage).await?;
        Ok(self
            .queue
            .enqueue(
                episode_id,
                stage,
                0,
                self.default_max_retries,
                serde_json::json!({}),
            )
            .await?)
    }

    /// Run the full pipeline for an episode starting from its current
    /// artifact state, chaining through stages up to (and including)
    /// `target_state` (default: `summarize`).
    pub async fn run_pipeline(
        &self,
        episode_id: Uuid,
        target_state: Option<Stage>,
    ) -> Result<Task, CommandError> {
        if !self.episode_exists(episode_id).await? {
            return Err(CommandError::NotFound);
        }
        let current_state = self
            .episodes
            .current_state(episode_id)
            .await
            .map_err(CommandError::Storage)?;
        let Some(starting_stage) = pipeline::stage_for_state(current_state) else {
            return Err(CommandError::WrongState);
        };
        let target = target_state.unwrap_or(Stage::Summarize);

        let metadata = serde_json::json!({
            "run_full_pipeline": true,
            "target_state": target.to_string(),
        });
        Ok(self
            .queue
            .enqueue(episode_id, starting_stage, 0, self.default_max_retries, metadata)
            .await?)
    }

    /// Cancel every pending/retry-scheduled task for an episode. Returns
    /// the number of tasks cancelled.
    pub async fn cancel_pipeline(&self, episode_id: Uuid) -> Result<u64, CommandError> {
        Ok(self.queue.cancel_pipeline(episode_id).await?)
    }

    /// Fetch a task's current status by id.
    pub async fn task_status(&self, task_id: Uuid) -> Result<Task, CommandError> {
        self.queue
            .by_id(task_id)
            .await?
            .ok_or(CommandError::NotFound)
    }

    pub async fn retry_dlq(&self, task_id: Uuid) -> Result<(), CommandError> {
        Ok(self.queue.retry_from_dlq(task_id).await?)
    }

    pub async fn skip_dlq(&self, task_id: Uuid) -> Result<(), CommandError> {
        Ok(self.queue.skip_dlq(task_id).await?)
    }

    pub async fn retry_all_dlq(&self) -> Result<u64, CommandError> {
        Ok(self.queue.retry_all_dlq().await?)
    }

    pub async fn retry_episode(&self, episode_id: Uuid) -> Result<Option<Task>, CommandError> {
        Ok(self.queue.retry_episode(episode_id).await?)
    }

    /// Subscribe to a task's progress stream, delegating directly to the
    /// [`ProgressBus`]; the stream closes on the task's terminal event.
    pub async fn subscribe_progress(
        &self,
        task_id: Uuid,
    ) -> std::pin::Pin<Box<dyn futures::Stream<Item = ProgressEvent> + Send>> {
        self.progress.subscribe(task_id).await
    }

    /// Non-streaming fallback: the last published progress event, if any.
    pub async fn current_progress(&self, task_id: Uuid) -> Option<ProgressEvent> {
        self.progress.current(task_id).await
    }

    /// Queue-wide snapshot of task counts by status.
    pub async fn queue_snapshot(&self) -> Result<castqueue_db::queries::tasks::TaskCounts, CommandError> {
        Ok(self.queue.counts_by_status().await?)
    }

    /// Direct pool access for callers (CLI/HTTP) that need queries this
    /// surface has no dedicated method for, e.g. listing dead-lettered
    /// tasks or looking up an episode's recorded failure.
    pub fn pool(&self) -> &sqlx::PgPool {
        self.queue.pool()
    }

    async fn episode_exists(&self, episode_id: Uuid) -> Result<bool, CommandError> {
        self.episodes
            .exists(episode_id)
            .await
            .map_err(CommandError::Storage)
    }

    async fn require_precondition(&self, episode_id: Uuid, stage: Stage) -> Result<(), CommandError> {
        if !self.episode_exists(episode_id).await? {
            return Err(CommandError::NotFound);
        }
        let current_state = self
            .episodes
            .current_state(episode_id)
            .await
            .map_err(CommandError::Storage)?;
        if current_state != pipeline::precondition(stage) {
            return Err(CommandError::WrongState);
        }
        Ok(())
    }
}
