//! The episode-lookup seam: episode/podcast metadata is out of scope for
//! this core (spec.md §1), so both the Worker and CommandSurface depend on
//! this trait instead of a concrete store. Callers implement it over their
//! own episode repository.

use async_trait::async_trait;
use uuid::Uuid;

use crate::pipeline::EpisodeState;

/// Read access to episode existence and pipeline artifact state.
#[async_trait]
pub trait EpisodeRepository: Send + Sync {
    /// Returns `true` if `episode_id` refers to a known episode.
    async fn exists(&self, episode_id: Uuid) -> anyhow::Result<bool>;

    /// The episode's current artifact state, used to pick a pipeline's
    /// starting stage and to validate `enqueue_stage` preconditions.
    async fn current_state(&self, episode_id: Uuid) -> anyhow::Result<EpisodeState>;
}

// Compile-time assertion: EpisodeRepository must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn EpisodeRepository) {}
};
