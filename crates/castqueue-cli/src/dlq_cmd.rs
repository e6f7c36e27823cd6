//! `castqueue dlq` subcommands: `list`, `retry`, `skip`, `retry-all`.

use anyhow::{Context, Result};
use uuid::Uuid;

use castqueue_core::command::CommandSurface;
use castqueue_db::models::TaskStatus;
use castqueue_db::queries::tasks;

pub async fn run_dlq_list(surface: &CommandSurface, pool: &sqlx::PgPool) -> Result<()> {
    // CommandSurface has no dedicated DLQ-listing method -- `dead` tasks are
    // just tasks in that status, so this reads the table directly the way
    // `queue_snapshot` reads aggregate counts.
    let _ = surface;
    let dead = tasks::by_status(pool, TaskStatus::Dead).await?;

    if dead.is_empty() {
        println!("DLQ is empty.");
        return Ok(());
    }

    for task in dead {
        println!(
            "{}  episode={}  stage={}  retries={}/{}  error={}",
            task.id,
            task.episode_id,
            task.stage,
            task.retry_count,
            task.max_retries,
            task.last_error.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

pub async fn run_dlq_retry(surface: &CommandSurface, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str)
        .with_context(|| format!("invalid task ID: {task_id_str}"))?;
    surface.retry_dlq(task_id).await?;
    println!("Task {task_id} returned to pending.");
    Ok(())
}

pub async fn run_dlq_skip(surface: &CommandSurface, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str)
        .with_context(|| format!("invalid task ID: {task_id_str}"))?;
    surface.skip_dlq(task_id).await?;
    println!("Task {task_id} marked completed (skipped).");
    Ok(())
}

pub async fn run_dlq_retry_all(surface: &CommandSurface) -> Result<()> {
    let retried = surface.retry_all_dlq().await?;
    println!("Retried {retried} dead task(s).");
    Ok(())
}
