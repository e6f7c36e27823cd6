//! Integration tests for the episode failure summary table.

use uuid::Uuid;

use castqueue_db::models::{ErrorType, Stage};
use castqueue_db::queries::episode_failures;

use castqueue_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn set_and_get_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    let recorded = episode_failures::set_episode_failure(
        &pool,
        episode_id,
        Stage::Transcribe,
        "transcription service timed out",
        ErrorType::Transient,
    )
    .await
    .expect("set should succeed");

    assert_eq!(recorded.episode_id, episode_id);
    assert!(recorded.is_failed());

    let fetched = episode_failures::get_episode_failure(&pool, episode_id)
        .await
        .expect("get should succeed")
        .expect("failure should exist");
    assert_eq!(fetched.failed_at_stage, Some(Stage::Transcribe));
    assert_eq!(fetched.failure_type, Some(ErrorType::Transient));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn set_is_upsert() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    episode_failures::set_episode_failure(
        &pool,
        episode_id,
        Stage::Download,
        "connection reset",
        ErrorType::Transient,
    )
    .await
    .unwrap();

    episode_failures::set_episode_failure(
        &pool,
        episode_id,
        Stage::Summarize,
        "model rejected input",
        ErrorType::Fatal,
    )
    .await
    .unwrap();

    let fetched = episode_failures::get_episode_failure(&pool, episode_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.failed_at_stage, Some(Stage::Summarize));
    assert_eq!(fetched.failure_type, Some(ErrorType::Fatal));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn clear_removes_the_row() {
    let (pool, db_name) = create_test_db().await;

    let episode_id = Uuid::new_v4();
    episode_failures::set_episode_failure(
        &pool,
        episode_id,
        Stage::Clean,
        "disk full",
        ErrorType::Fatal,
    )
    .await
    .unwrap();

    episode_failures::clear_episode_failure(&pool, episode_id)
        .await
        .expect("clear should succeed");

    let fetched = episode_failures::get_episode_failure(&pool, episode_id)
        .await
        .unwrap();
    assert!(fetched.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_missing_episode_returns_none() {
    let (pool, db_name) = create_test_db().await;

    let fetched = episode_failures::get_episode_failure(&pool, Uuid::new_v4())
        .await
        .expect("get should succeed");
    assert!(fetched.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_returns_all_recorded_failures() {
    let (pool, db_name) = create_test_db().await;

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    episode_failures::set_episode_failure(&pool, a, Stage::Download, "a", ErrorType::Transient)
        .await
        .unwrap();
    episode_failures::set_episode_failure(&pool, b, Stage::Clean, "b", ErrorType::Fatal)
        .await
        .unwrap();

    let all = episode_failures::list_episode_failures(&pool).await.unwrap();
    assert_eq!(all.len(), 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}
