//! The Worker (component C7): the single cooperative claim/execute/classify/
//! persist/chain loop described in the component design.
//!
//! A claim/dispatch/await/cancel-drain main loop, collapsed to the
//! single-task-at-a-time loop this system's handler contract calls for --
//! "a single worker is sufficient for correctness"; multiple instances may
//! run against the same pool since `claim_next` is atomic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use castqueue_db::models::{ErrorType, Stage, Task, TaskStatus};

use crate::backoff::{self, BackoffConfig};
use crate::classify::{self, ClassifyConfig, HandlerError};
use crate::episode::{self, EpisodeRepository};
use crate::handler::{Handler, HandlerContext, HandlerRegistry};
use crate::pipeline;
use crate::progress::{ProgressBus, ProgressEvent};
use crate::queue::{state_machine, Queue};

/// Tuning knobs for [`run_worker`], drawn from the Configuration table in
/// spec.md §6.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backoff: BackoffConfig,
    pub classify: ClassifyConfig,
    pub orphan_staleness: Duration,
    pub idle_sleep: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            classify: ClassifyConfig::default(),
            orphan_staleness: Duration::from_secs(300),
            idle_sleep: Duration::from_millis(1000),
        }
    }
}

/// Run the worker loop until `cancel` fires.
///
/// Performs orphan recovery once at startup, then repeatedly claims,
/// executes, classifies, and persists one task at a time, per spec.md
/// §4.7. Returns `Ok(())` on a clean cancellation-triggered exit.
pub async fn run_worker(
    pool: PgPool,
    registry: Arc<HandlerRegistry>,
    episodes: Arc<dyn EpisodeRepository>,
    progress: Arc<ProgressBus>,
    config: WorkerConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let queue = Queue::new(pool.clone());

    let stale_before = Utc::now() - chrono::Duration::from_std(config.orphan_staleness)?;
    let recovered = queue.recover_orphaned(stale_before).await?;
    for task in &recovered {
        tracing::warn!(task_id = %task.id, stage = %task.stage, "recovered orphaned task");
    }

    loop {
        if cancel.is_cancelled() {
            tracing::info!("worker cancelled, exiting loop");
            return Ok(());
        }

        let Some(task) = claim_or_sleep(&queue, &config, &cancel).await? else {
            continue;
        };

        tracing::info!(task_id = %task.id, episode_id = %task.episode_id, stage = %task.stage, "claimed task");

        if !resolve_episode(episodes.as_ref(), &task).await? {
            let classification = classify::Classification {
                error_type: ErrorType::Fatal,
                reason: "episode not found".to_owned(),
            };
            handle_classified_error(&queue, &progress, &task, classification, &config).await?;
            continue;
        }

        let handler = registry.get(task.stage);
        let outcome = match handler {
            Some(handler) => invoke_handler(handler, &task, &progress, &cancel).await,
            None => Err(HandlerError::Fatal(format!(
                "no handler registered for stage {}",
                task.stage
            ))),
        };

        match outcome {
            Ok(()) => {
                ensure_transition(task.status, TaskStatus::Completed)?;
                handle_success(&queue, &progress, &task).await?;
            }
            Err(HandlerError::Cancelled) => {
                ensure_transition(task.status, TaskStatus::Cancelled)?;
                queue.mark_cancelled(task.id).await?;
                publish_terminal(&progress, &task, "cancelled").await;
            }
            Err(err) => {
                let classification = classify::classify(&err, config.classify);
                handle_classified_error(&queue, &progress, &task, classification, &config).await?;
            }
        }
    }
}

/// Step 1: claim the next runnable task, sleeping briefly if none is ready.
///
/// Returns `Ok(None)` (having already slept) when the queue was empty or
/// cancellation fired during the sleep, so the caller's `continue` re-checks
/// `cancel` on the next iteration.
async fn claim_or_sleep(
    queue: &Queue,
    config: &WorkerConfig,
    cancel: &CancellationToken,
) -> Result<Option<Task>> {
    if let Some(task) = queue.claim_next(None).await? {
        return Ok(Some(task));
    }

    tokio::select! {
        _ = tokio::time::sleep(config.idle_sleep) => {}
        _ = cancel.cancelled() => {}
    }
    Ok(None)
}

/// Step 2: resolve the episode a claimed task belongs to.
async fn resolve_episode(episodes: &dyn EpisodeRepository, task: &Task) -> Result<bool> {
    episodes
        .exists(task.episode_id)
        .await
        .with_context(|| format!("failed to resolve episode {}", task.episode_id))
}

/// Step 3: invoke the registered handler with a progress emitter and
/// cancellation token bound to this task.
async fn invoke_handler(
    handler: &dyn Handler,
    task: &Task,
    progress: &Arc<ProgressBus>,
    cancel: &CancellationToken,
) -> Result<(), HandlerError> {
    let ctx = HandlerContext {
        task: task.clone(),
        progress: Arc::clone(progress),
        cancel: cancel.clone(),
    };
    handler.execute(&ctx).await
}

/// Step 4 (success path): mark completed, clear any recorded episode
/// failure for this stage, chain the next stage if the pipeline policy
/// calls for it, and publish the terminal progress event.
async fn handle_success(queue: &Queue, progress: &Arc<ProgressBus>, task: &Task) -> Result<()> {
    queue.mark_completed(task.id).await?;

    if let Some(failure) = episode::get_failure(queue_pool(queue), task.episode_id).await? {
        if failure.failed_at_stage == Some(task.stage) {
            episode::clear_failure(queue_pool(queue), task.episode_id).await?;
        }
    }

    let run_full_pipeline = task
        .metadata
        .get("run_full_pipeline")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let target_state = task
        .metadata
        .get("target_state")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Stage>().ok())
        .unwrap_or(Stage::Summarize);

    if pipeline::should_chain(run_full_pipeline, task.stage, target_state) {
        if let Some(next_stage) = task.stage.next() {
            queue
                .enqueue(
                    task.episode_id,
                    next_stage,
                    task.priority,
                    task.max_retries,
                    task.metadata.clone(),
                )
                .await?;
            tracing::info!(
                episode_id = %task.episode_id,
                from_stage = %task.stage,
                to_stage = %next_stage,
                "chained next stage"
            );
        }
    }

    publish_terminal(progress, task, "completed").await;
    Ok(())
}

/// Steps 4b/5 (error path): dispatch on the error classification, scheduling
/// a retry, moving the task to its terminal failure state, or marking it
/// dead -- recording the episode failure on any terminal outcome.
async fn handle_classified_error(
    queue: &Queue,
    progress: &Arc<ProgressBus>,
    task: &Task,
    classification: classify::Classification,
    config: &WorkerConfig,
) -> Result<()> {
    match classification.error_type {
        ErrorType::Transient if task.retry_count < task.max_retries => {
            ensure_transition(task.status, TaskStatus::RetryScheduled)?;
            let delay = backoff::next_delay(task.retry_count as u32, &config.backoff);
            let next_retry_at = Utc::now() + chrono::Duration::from_std(delay)?;
            queue
                .schedule_retry(task.id, next_retry_at, &classification.reason)
                .await?;
            tracing::warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                next_retry_at = %next_retry_at,
                reason = %classification.reason,
                "scheduled retry"
            );
            publish_terminal(progress, task, &classification.reason).await;
        }
        ErrorType::Transient => {
            ensure_transition(task.status, TaskStatus::Failed)?;
            queue.mark_failed(task.id, &classification.reason).await?;
            episode::record_failure(
                queue_pool(queue),
                task.episode_id,
                task.stage,
                &classification.reason,
                ErrorType::Transient,
            )
            .await?;
            tracing::error!(task_id = %task.id, reason = %classification.reason, "retries exhausted");
            publish_terminal(progress, task, "failed").await;
        }
        ErrorType::Fatal => {
            ensure_transition(task.status, TaskStatus::Dead)?;
            queue.mark_dead(task.id, &classification.reason).await?;
            episode::record_failure(
                queue_pool(queue),
                task.episode_id,
                task.stage,
                &classification.reason,
                ErrorType::Fatal,
            )
            .await?;
            tracing::error!(task_id = %task.id, reason = %classification.reason, "fatal error, moved to DLQ");
            publish_terminal(progress, task, "dead").await;
        }
    }
    Ok(())
}

/// Guard a worker-driven transition against the state diagram before
/// issuing the write that performs it, so the pure matcher -- not the SQL
/// `WHERE` clause each write also carries -- is the thing that decides
/// whether this outcome is legal from here.
fn ensure_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    anyhow::ensure!(
        state_machine::is_valid_transition(from, to),
        "illegal task transition {from} -> {to}"
    );
    Ok(())
}

/// Step 6: publish the final progress event for this task's attempt.
async fn publish_terminal(progress: &Arc<ProgressBus>, task: &Task, message: impl Into<String>) {
    progress
        .publish(ProgressEvent::terminal(task.id, task.stage, message))
        .await;
}

/// [`Queue`] only exposes the operations the worker needs, not its pool --
/// episode-failure bookkeeping lives in a sibling table the worker also
/// needs direct access to. A thin accessor keeps `Queue` from growing an
/// episode-failure API it otherwise has no use for.
fn queue_pool(queue: &Queue) -> &PgPool {
    queue.pool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct AlwaysPresentRepo;

    #[async_trait]
    impl EpisodeRepository for AlwaysPresentRepo {
        async fn exists(&self, _episode_id: Uuid) -> Result<bool> {
            Ok(true)
        }

        async fn current_state(&self, _episode_id: Uuid) -> Result<crate::pipeline::EpisodeState> {
            Ok(crate::pipeline::EpisodeState::Discovered)
        }
    }

    struct AlwaysAbsentRepo;

    #[async_trait]
    impl EpisodeRepository for AlwaysAbsentRepo {
        async fn exists(&self, _episode_id: Uuid) -> Result<bool> {
            Ok(false)
        }

        async fn current_state(&self, _episode_id: Uuid) -> Result<crate::pipeline::EpisodeState> {
            anyhow::bail!("no episode")
        }
    }

    /// A handler whose outcome is scripted per invocation, counting calls.
    struct ScriptedHandler {
        stage: Stage,
        outcomes: Mutex<Vec<Result<(), HandlerError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedHandler {
        fn new(stage: Stage, outcomes: Vec<Result<(), HandlerError>>) -> Self {
            Self {
                stage,
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Handler for ScriptedHandler {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(())
            } else {
                outcomes.remove(0)
            }
        }
    }

    /// A handler that performs its side effect once, then detects on a
    /// later invocation that the artifact it would produce already exists
    /// and reports completion without redoing the work.
    struct ArtifactAwareHandler {
        stage: Stage,
        artifact_exists: AtomicBool,
        side_effects: AtomicUsize,
    }

    impl ArtifactAwareHandler {
        fn new(stage: Stage) -> Self {
            Self {
                stage,
                artifact_exists: AtomicBool::new(false),
                side_effects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Handler for ArtifactAwareHandler {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(&self, ctx: &HandlerContext) -> Result<(), HandlerError> {
            if self.artifact_exists.swap(true, Ordering::SeqCst) {
                ctx.report(Some(100.0), "artifact already present, skipping")
                    .await;
                return Ok(());
            }
            self.side_effects.fetch_add(1, Ordering::SeqCst);
            ctx.report(Some(100.0), "produced artifact").await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_invoked_twice_skips_side_effects_on_second_call() {
        let handler = ArtifactAwareHandler::new(Stage::Download);
        let task = sample_task(Stage::Download, serde_json::json!({}));
        let progress = Arc::new(ProgressBus::new());
        let cancel = CancellationToken::new();

        let first = invoke_handler(&handler, &task, &progress, &cancel).await;
        let second = invoke_handler(&handler, &task, &progress, &cancel).await;

        assert!(first.is_ok());
        assert!(second.is_ok(), "re-invocation still reports completed");
        assert_eq!(
            handler.side_effects.load(Ordering::SeqCst),
            1,
            "artifact produced only once across both invocations"
        );
    }

    fn sample_task(stage: Stage, metadata: serde_json::Value) -> Task {
        Task {
            id: Uuid::new_v4(),
            episode_id: Uuid::new_v4(),
            stage,
            status: TaskStatus::Processing,
            priority: 0,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            error_type: None,
            last_error: None,
            metadata,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn resolve_episode_reports_missing() {
        let task = sample_task(Stage::Download, serde_json::json!({}));
        assert!(resolve_episode(&AlwaysAbsentRepo, &task).await.unwrap() == false);
        assert!(resolve_episode(&AlwaysPresentRepo, &task).await.unwrap());
    }

    #[tokio::test]
    async fn invoke_handler_reports_cancellation_as_cancelled() {
        let handler = ScriptedHandler::new(Stage::Download, vec![Err(HandlerError::Cancelled)]);
        let task = sample_task(Stage::Download, serde_json::json!({}));
        let progress = Arc::new(ProgressBus::new());
        let cancel = CancellationToken::new();
        let result = invoke_handler(&handler, &task, &progress, &cancel).await;
        assert!(matches!(result, Err(HandlerError::Cancelled)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.orphan_staleness, Duration::from_secs(300));
        assert_eq!(config.idle_sleep, Duration::from_millis(1000));
        assert_eq!(config.backoff, BackoffConfig::default());
    }
}
