//! `castqueue enqueue` command: enqueue a single stage for an episode.

use anyhow::{Context, Result};
use uuid::Uuid;

use castqueue_core::command::CommandSurface;

pub async fn run_enqueue(surface: &CommandSurface, episode_id_str: &str, stage_str: &str) -> Result<()> {
    let episode_id = Uuid::parse_str(episode_id_str)
        .with_context(|| format!("invalid episode ID: {episode_id_str}"))?;
    let stage = stage_str
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("invalid stage: {stage_str}"))?;

    let task = surface.enqueue_stage(episode_id, stage).await?;

    println!("Enqueued task {} ({} for episode {})", task.id, task.stage, task.episode_id);
    println!("  status: {}", task.status);

    Ok(())
}
