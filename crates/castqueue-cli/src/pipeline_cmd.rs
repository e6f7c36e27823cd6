//! `castqueue run-pipeline` and `castqueue cancel` commands.

use anyhow::{Context, Result};
use uuid::Uuid;

use castqueue_core::command::CommandSurface;

pub async fn run_pipeline(
    surface: &CommandSurface,
    episode_id_str: &str,
    target_state: Option<String>,
) -> Result<()> {
    let episode_id = Uuid::parse_str(episode_id_str)
        .with_context(|| format!("invalid episode ID: {episode_id_str}"))?;

    let target = target_state
        .map(|s| s.parse().map_err(|e| anyhow::anyhow!("{e}")))
        .transpose()
        .context("invalid target stage")?;

    let task = surface.run_pipeline(episode_id, target).await?;

    println!(
        "Pipeline started for episode {episode_id}: first task {} ({})",
        task.id, task.stage
    );

    Ok(())
}

pub async fn run_cancel(surface: &CommandSurface, episode_id_str: &str) -> Result<()> {
    let episode_id = Uuid::parse_str(episode_id_str)
        .with_context(|| format!("invalid episode ID: {episode_id_str}"))?;

    let cancelled = surface.cancel_pipeline(episode_id).await?;

    println!("Cancelled {cancelled} pending/retry-scheduled task(s) for episode {episode_id}");

    Ok(())
}
