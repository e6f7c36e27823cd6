//! Concrete [`EpisodeRepository`] backed by this core's own task history.
//!
//! spec.md §1 scopes episode/podcast metadata persistence out of this core
//! -- "available via a repository interface" -- so a real deployment is
//! expected to supply its own implementation backed by whatever owns that
//! metadata. The CLI and HTTP surface still need *something* to run
//! against, so this derives an episode's artifact state from the highest
//! postcondition reached by any completed task for it, defaulting to
//! `Discovered` for an episode with no task history at all. An episode is
//! never "not found" under this scheme, which only matters for
//! `CommandSurface::run_pipeline`/`enqueue_stage`'s existence check -- see
//! DESIGN.md for the corresponding Open Question decision.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use castqueue_core::episode::EpisodeRepository;
use castqueue_core::pipeline::{self, EpisodeState};
use castqueue_db::models::TaskStatus;
use castqueue_db::queries::tasks;

pub struct TaskHistoryEpisodeRepository {
    pool: PgPool,
}

impl TaskHistoryEpisodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EpisodeRepository for TaskHistoryEpisodeRepository {
    async fn exists(&self, _episode_id: Uuid) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn current_state(&self, episode_id: Uuid) -> anyhow::Result<EpisodeState> {
        let history = tasks::by_episode(&self.pool, episode_id).await?;

        let furthest = history
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| pipeline::postcondition(t.stage))
            .max_by_key(state_rank);

        Ok(furthest.unwrap_or(EpisodeState::Discovered))
    }
}

fn state_rank(state: &EpisodeState) -> u8 {
    match state {
        EpisodeState::Discovered => 0,
        EpisodeState::Downloaded => 1,
        EpisodeState::Downsampled => 2,
        EpisodeState::Transcribed => 3,
        EpisodeState::Cleaned => 4,
        EpisodeState::Summarized => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_rank_is_monotonic_in_pipeline_order() {
        let ranks: Vec<u8> = [
            EpisodeState::Discovered,
            EpisodeState::Downloaded,
            EpisodeState::Downsampled,
            EpisodeState::Transcribed,
            EpisodeState::Cleaned,
            EpisodeState::Summarized,
        ]
        .iter()
        .map(state_rank)
        .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
    }
}
