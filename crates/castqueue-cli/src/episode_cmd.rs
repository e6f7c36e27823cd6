//! `castqueue episode-failure` and `castqueue retry-episode` commands.

use anyhow::{Context, Result};
use uuid::Uuid;

use castqueue_core::command::CommandSurface;
use castqueue_db::queries::episode_failures;

pub async fn run_episode_failure(
    pool: &sqlx::PgPool,
    episode_id_str: &str,
) -> Result<()> {
    let episode_id = Uuid::parse_str(episode_id_str)
        .with_context(|| format!("invalid episode ID: {episode_id_str}"))?;

    match episode_failures::get_episode_failure(pool, episode_id).await? {
        Some(failure) if failure.is_failed() => {
            println!("Episode {episode_id} is failed:");
            println!("  stage:  {}", failure.failed_at_stage.unwrap());
            println!("  type:   {}", failure.failure_type.unwrap());
            println!("  reason: {}", failure.failure_reason.unwrap_or_default());
            if let Some(failed_at) = failure.failed_at {
                println!("  at:     {failed_at}");
            }
        }
        _ => println!("Episode {episode_id} has no recorded failure."),
    }

    Ok(())
}

pub async fn run_retry_episode(surface: &CommandSurface, episode_id_str: &str) -> Result<()> {
    let episode_id = Uuid::parse_str(episode_id_str)
        .with_context(|| format!("invalid episode ID: {episode_id_str}"))?;

    match surface.retry_episode(episode_id).await? {
        Some(task) => println!(
            "Episode {episode_id} requeued at stage {} (task {})",
            task.stage, task.id
        ),
        None => println!("Episode {episode_id} had no recorded failure to retry."),
    }

    Ok(())
}
