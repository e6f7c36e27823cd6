//! End-to-end tests of the worker loop against a real PostgreSQL instance,
//! covering the scenarios enumerated in spec.md §8.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use castqueue_core::backoff::BackoffConfig;
use castqueue_core::classify::HandlerError;
use castqueue_core::episode::{self, EpisodeRepository};
use castqueue_core::handler::{Handler, HandlerContext, HandlerRegistry};
use castqueue_core::pipeline::EpisodeState;
use castqueue_core::queue::Queue;
use castqueue_core::worker::{self, WorkerConfig};
use castqueue_db::models::{Stage, TaskStatus};
use castqueue_db::queries::tasks;

use castqueue_test_utils::{create_test_db, drop_test_db};

/// A repository that reports every episode it's told about as existing, at
/// a fixed pipeline state (this core does not model episode progression).
struct StaticRepo {
    known: Mutex<HashMap<Uuid, EpisodeState>>,
}

impl StaticRepo {
    fn new() -> Self {
        Self {
            known: Mutex::new(HashMap::new()),
        }
    }

    fn know(&self, episode_id: Uuid) {
        self.known.lock().unwrap().insert(episode_id, EpisodeState::Discovered);
    }
}

#[async_trait]
impl EpisodeRepository for StaticRepo {
    async fn exists(&self, episode_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.known.lock().unwrap().contains_key(&episode_id))
    }

    async fn current_state(&self, episode_id: Uuid) -> anyhow::Result<EpisodeState> {
        self.known
            .lock()
            .unwrap()
            .get(&episode_id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown episode"))
    }
}

/// A handler whose per-call outcome is pre-scripted, for deterministic
/// transient-then-success / always-fails / always-fatal scenarios.
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

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        backoff: BackoffConfig {
            base: Duration::from_millis(1),
            multiplier: 1.0,
            max: Duration::from_millis(50),
        },
        idle_sleep: Duration::from_millis(20),
        ..WorkerConfig::default()
    }
}

/// Run `run_worker` in the background until it has drained every claimable
/// task at least `ticks` times, then cancel it and wait for it to exit.
async fn drain(
    pool: sqlx::PgPool,
    registry: HandlerRegistry,
    repo: Arc<dyn EpisodeRepository>,
    progress: Arc<castqueue_core::progress::ProgressBus>,
    settle: Duration,
) {
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let handle = tokio::spawn(worker::run_worker(
        pool,
        Arc::new(registry),
        repo,
        progress,
        fast_worker_config(),
        worker_cancel,
    ));
    tokio::time::sleep(settle).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn happy_full_pipeline_chains_through_every_stage() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(StaticRepo::new());
    repo.know(episode_id);

    let queue = Queue::new(pool.clone());
    queue
        .enqueue(
            episode_id,
            Stage::Download,
            0,
            3,
            json!({"run_full_pipeline": true, "target_state": "summarize"}),
        )
        .await
        .unwrap();

    let mut registry = HandlerRegistry::new();
    for stage in Stage::ALL {
        registry.register(ScriptedHandler::new(stage, vec![]));
    }

    drain(
        pool.clone(),
        registry,
        repo,
        Arc::new(castqueue_core::progress::ProgressBus::new()),
        Duration::from_millis(500),
    )
    .await;

    for stage in Stage::ALL {
        let matching: Vec<_> = tasks::by_episode(&pool, episode_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.stage == stage)
            .collect();
        assert_eq!(matching.len(), 1, "exactly one task for stage {stage}");
        assert_eq!(matching[0].status, TaskStatus::Completed, "stage {stage} should complete");
    }

    assert!(episode::get_failure(&pool, episode_id).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transient_then_success_retries_and_chains() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(StaticRepo::new());
    repo.know(episode_id);

    let queue = Queue::new(pool.clone());
    queue
        .enqueue(
            episode_id,
            Stage::Transcribe,
            0,
            3,
            json!({"run_full_pipeline": true, "target_state": "clean"}),
        )
        .await
        .unwrap();

    let mut registry = HandlerRegistry::new();
    registry.register(ScriptedHandler::new(
        Stage::Transcribe,
        vec![Err(HandlerError::Http(503))],
    ));
    registry.register(ScriptedHandler::new(Stage::Clean, vec![]));

    drain(
        pool.clone(),
        registry,
        repo,
        Arc::new(castqueue_core::progress::ProgressBus::new()),
        Duration::from_millis(500),
    )
    .await;

    let transcribe_task = tasks::by_episode(&pool, episode_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.stage == Stage::Transcribe)
        .unwrap();
    assert_eq!(transcribe_task.status, TaskStatus::Completed);
    assert_eq!(transcribe_task.retry_count, 1);

    let clean_task = tasks::by_episode(&pool, episode_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.stage == Stage::Clean);
    assert!(clean_task.is_some(), "clean should have been chained");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn exhausted_transient_moves_to_failed_without_chaining() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(StaticRepo::new());
    repo.know(episode_id);

    let queue = Queue::new(pool.clone());
    queue
        .enqueue(
            episode_id,
            Stage::Download,
            0,
            3,
            json!({"run_full_pipeline": true, "target_state": "summarize"}),
        )
        .await
        .unwrap();

    let mut registry = HandlerRegistry::new();
    registry.register(ScriptedHandler::new(
        Stage::Download,
        vec![
            Err(HandlerError::Io(std::io::ErrorKind::ConnectionReset)),
            Err(HandlerError::Io(std::io::ErrorKind::ConnectionReset)),
            Err(HandlerError::Io(std::io::ErrorKind::ConnectionReset)),
            Err(HandlerError::Io(std::io::ErrorKind::ConnectionReset)),
        ],
    ));

    drain(
        pool.clone(),
        registry,
        repo,
        Arc::new(castqueue_core::progress::ProgressBus::new()),
        Duration::from_millis(500),
    )
    .await;

    let download_task = tasks::by_episode(&pool, episode_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.stage == Stage::Download)
        .unwrap();
    assert_eq!(download_task.status, TaskStatus::Failed);
    assert_eq!(download_task.retry_count, 3);

    let failure = episode::get_failure(&pool, episode_id).await.unwrap().unwrap();
    assert_eq!(failure.failed_at_stage, Some(Stage::Download));

    let downsample = tasks::by_episode(&pool, episode_id)
        .await
        .unwrap()
        .into_iter()
        .any(|t| t.stage == Stage::Downsample);
    assert!(!downsample, "no downsample task should be enqueued");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fatal_error_moves_straight_to_dead() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(StaticRepo::new());
    repo.know(episode_id);

    let queue = Queue::new(pool.clone());
    queue
        .enqueue(episode_id, Stage::Download, 0, 3, json!({}))
        .await
        .unwrap();

    let mut registry = HandlerRegistry::new();
    registry.register(ScriptedHandler::new(
        Stage::Download,
        vec![Err(HandlerError::Http(404))],
    ));

    drain(
        pool.clone(),
        registry,
        repo,
        Arc::new(castqueue_core::progress::ProgressBus::new()),
        Duration::from_millis(300),
    )
    .await;

    let download_task = tasks::by_episode(&pool, episode_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.stage == Stage::Download)
        .unwrap();
    assert_eq!(download_task.status, TaskStatus::Dead);
    assert_eq!(download_task.retry_count, 0, "fatal errors never retry");

    let dlq = tasks::by_status(&pool, TaskStatus::Dead).await.unwrap();
    assert!(dlq.iter().any(|t| t.id == download_task.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn orphan_recovery_reclaims_stale_processing_task() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, Uuid::new_v4(), Stage::Clean, 0, 3, json!({}))
        .await
        .unwrap();
    tasks::claim_next(&pool, None).await.unwrap().unwrap();

    let stale_before = chrono::Utc::now() + chrono::Duration::seconds(5);
    let recovered = tasks::recover_orphaned(&pool, stale_before).await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, task.id);

    // A second pass over the same cutoff finds nothing left to recover.
    let again = tasks::recover_orphaned(&pool, stale_before).await.unwrap();
    assert!(again.is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}
