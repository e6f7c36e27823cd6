//! Integration tests for `CommandSurface` against a real PostgreSQL instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use castqueue_core::command::{CommandError, CommandSurface};
use castqueue_core::episode::EpisodeRepository;
use castqueue_core::pipeline::EpisodeState;
use castqueue_core::progress::ProgressBus;
use castqueue_db::models::{Stage, TaskStatus};
use castqueue_db::queries::tasks;

use castqueue_test_utils::{create_test_db, drop_test_db};

struct FakeRepo {
    known: Mutex<HashMap<Uuid, EpisodeState>>,
}

impl FakeRepo {
    fn new() -> Self {
        Self {
            known: Mutex::new(HashMap::new()),
        }
    }

    fn with(episode_id: Uuid, state: EpisodeState) -> Self {
        let repo = Self::new();
        repo.known.lock().unwrap().insert(episode_id, state);
        repo
    }
}

#[async_trait]
impl EpisodeRepository for FakeRepo {
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

#[tokio::test]
async fn enqueue_stage_succeeds_when_precondition_met() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(FakeRepo::with(episode_id, EpisodeState::Discovered));
    let surface = CommandSurface::new(pool.clone(), repo, Arc::new(ProgressBus::new()));

    let task = surface
        .enqueue_stage(episode_id, Stage::Download)
        .await
        .expect("download should be enqueueable from discovered");
    assert_eq!(task.stage, Stage::Download);
    assert_eq!(task.status, TaskStatus::Pending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn enqueue_stage_rejects_duplicate_active_task() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(FakeRepo::with(episode_id, EpisodeState::Discovered));
    let surface = CommandSurface::new(pool.clone(), repo, Arc::new(ProgressBus::new()));

    surface.enqueue_stage(episode_id, Stage::Download).await.unwrap();
    let second = surface.enqueue_stage(episode_id, Stage::Download).await;
    assert!(matches!(second, Err(CommandError::AlreadyQueued)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn run_pipeline_picks_starting_stage_from_episode_state() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(FakeRepo::with(episode_id, EpisodeState::Downsampled));
    let surface = CommandSurface::new(pool.clone(), repo, Arc::new(ProgressBus::new()));

    let task = surface
        .run_pipeline(episode_id, None)
        .await
        .expect("should enqueue from the transcribe stage");
    assert_eq!(task.stage, Stage::Transcribe);
    assert_eq!(task.metadata["run_full_pipeline"], true);
    assert_eq!(task.metadata["target_state"], "summarize");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_mid_pipeline_leaves_processing_task_and_suppresses_future_stages() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(FakeRepo::with(episode_id, EpisodeState::Discovered));
    let surface = CommandSurface::new(pool.clone(), Arc::clone(&repo) as Arc<dyn EpisodeRepository>, Arc::new(ProgressBus::new()));

    // download/downsample already completed, transcribe currently processing.
    tasks::insert_task(&pool, episode_id, Stage::Download, 0, 3, serde_json::json!({}))
        .await
        .unwrap();
    let download = tasks::claim_next(&pool, Some(Stage::Download)).await.unwrap().unwrap();
    tasks::complete_task(&pool, download.id).await.unwrap();

    tasks::insert_task(&pool, episode_id, Stage::Downsample, 0, 3, serde_json::json!({}))
        .await
        .unwrap();
    let downsample = tasks::claim_next(&pool, Some(Stage::Downsample)).await.unwrap().unwrap();
    tasks::complete_task(&pool, downsample.id).await.unwrap();

    tasks::insert_task(&pool, episode_id, Stage::Transcribe, 0, 3, serde_json::json!({}))
        .await
        .unwrap();
    let transcribe = tasks::claim_next(&pool, Some(Stage::Transcribe)).await.unwrap().unwrap();

    let cancelled = surface.cancel_pipeline(episode_id).await.unwrap();
    assert_eq!(cancelled, 0, "no pending/retry_scheduled tasks exist to cancel");

    let refetched = tasks::by_id(&pool, transcribe.id).await.unwrap().unwrap();
    assert_eq!(refetched.status, TaskStatus::Processing, "in-flight task is untouched");

    let completed = tasks::by_episode(&pool, episode_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    assert_eq!(completed, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn bump_promotes_a_pending_task_above_another() {
    let (pool, db_name) = create_test_db().await;

    let t1 = tasks::insert_task(&pool, Uuid::new_v4(), Stage::Download, 0, 3, serde_json::json!({}))
        .await
        .unwrap();
    let t2 = tasks::insert_task(&pool, Uuid::new_v4(), Stage::Download, 0, 3, serde_json::json!({}))
        .await
        .unwrap();

    let claimed = tasks::claim_next(&pool, None).await.unwrap().unwrap();
    assert_eq!(claimed.id, t1.id, "older same-priority task is claimed first");
    tasks::mark_cancelled(&pool, claimed.id).await.unwrap();

    tasks::bump(&pool, t2.id).await.expect("bump should succeed");

    let reclaimed = tasks::claim_next(&pool, Some(Stage::Download)).await.unwrap();
    assert_eq!(reclaimed.map(|t| t.id), Some(t2.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dlq_lifecycle_retry_and_skip() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(FakeRepo::with(episode_id, EpisodeState::Discovered));
    let surface = CommandSurface::new(pool.clone(), repo, Arc::new(ProgressBus::new()));

    let task = tasks::insert_task(&pool, episode_id, Stage::Download, 0, 1, serde_json::json!({}))
        .await
        .unwrap();
    tasks::claim_next(&pool, None).await.unwrap().unwrap();
    tasks::fail_task(&pool, task.id, TaskStatus::Dead, castqueue_db::models::ErrorType::Fatal, "boom")
        .await
        .unwrap();

    surface.retry_dlq(task.id).await.expect("retry_dlq should succeed");
    let revived = tasks::by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(revived.status, TaskStatus::Pending);

    tasks::claim_next(&pool, None).await.unwrap().unwrap();
    tasks::fail_task(&pool, task.id, TaskStatus::Dead, castqueue_db::models::ErrorType::Fatal, "boom again")
        .await
        .unwrap();

    surface.skip_dlq(task.id).await.expect("skip_dlq should succeed");
    let skipped = tasks::by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(skipped.status, TaskStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_episode_clears_failure_and_reenqueues_failed_stage() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let repo = Arc::new(FakeRepo::with(episode_id, EpisodeState::Discovered));
    let surface = CommandSurface::new(pool.clone(), repo, Arc::new(ProgressBus::new()));

    castqueue_db::queries::episode_failures::set_episode_failure(
        &pool,
        episode_id,
        Stage::Transcribe,
        "HTTP 503",
        castqueue_db::models::ErrorType::Transient,
    )
    .await
    .unwrap();

    let retried = surface
        .retry_episode(episode_id)
        .await
        .expect("retry_episode should succeed")
        .expect("a fresh task should be enqueued");
    assert_eq!(retried.stage, Stage::Transcribe);
    assert_eq!(retried.retry_count, 0);

    let failure = castqueue_db::queries::episode_failures::get_episode_failure(&pool, episode_id)
        .await
        .unwrap();
    assert!(failure.is_none(), "failure record should be cleared");

    pool.close().await;
    drop_test_db(&db_name).await;
}
