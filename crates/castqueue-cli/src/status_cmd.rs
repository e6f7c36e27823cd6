//! `castqueue status` and `castqueue queue` commands.

use anyhow::{Context, Result};
use uuid::Uuid;

use castqueue_core::command::CommandSurface;

/// Print a single task's current status.
pub async fn run_status(surface: &CommandSurface, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str)
        .with_context(|| format!("invalid task ID: {task_id_str}"))?;

    let task = surface.task_status(task_id).await?;

    println!("Task {}", task.id);
    println!("  episode:     {}", task.episode_id);
    println!("  stage:       {}", task.stage);
    println!("  status:      {}", task.status);
    println!("  priority:    {}", task.priority);
    println!("  retries:     {}/{}", task.retry_count, task.max_retries);
    if let Some(next_retry_at) = task.next_retry_at {
        println!("  next retry:  {next_retry_at}");
    }
    if let Some(error_type) = task.error_type {
        println!("  error type:  {error_type}");
    }
    if let Some(last_error) = &task.last_error {
        println!("  last error:  {last_error}");
    }

    Ok(())
}

/// Print a queue-wide snapshot of task counts by status.
pub async fn run_queue_snapshot(surface: &CommandSurface) -> Result<()> {
    let counts = surface.queue_snapshot().await?;

    println!("Queue snapshot:");
    println!("  pending:          {}", counts.pending);
    println!("  processing:       {}", counts.processing);
    println!("  retry_scheduled:  {}", counts.retry_scheduled);
    println!("  completed:        {}", counts.completed);
    println!("  failed:           {}", counts.failed);
    println!("  dead:             {}", counts.dead);
    println!("  cancelled:        {}", counts.cancelled);
    println!("  total:            {}", counts.total);

    Ok(())
}
