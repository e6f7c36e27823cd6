//! Stage preconditions/postconditions and the pipeline-chaining policy.
//!
//! This is the "pipeline-chaining policy" named in the component overview:
//! a pure, total-order view of which episode artifact state each stage
//! requires and produces, used by `CommandSurface` to pick a starting
//! stage and by the worker to decide whether to chain to the next one.

use castqueue_db::models::Stage;

/// The artifact state an episode is in. `CommandSurface::run_pipeline`
/// picks the starting stage from this, and each stage's handler is
/// expected to leave the episode in the corresponding post-state on
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Discovered,
    Downloaded,
    Downsampled,
    Transcribed,
    Cleaned,
    Summarized,
}

/// The episode state a stage requires before it can run.
pub fn precondition(stage: Stage) -> EpisodeState {
    match stage {
        Stage::Download => EpisodeState::Discovered,
        Stage::Downsample => EpisodeState::Downloaded,
        Stage::Transcribe => EpisodeState::Downsampled,
        Stage::Clean => EpisodeState::Transcribed,
        Stage::Summarize => EpisodeState::Cleaned,
    }
}

/// The episode state a stage produces on success.
pub fn postcondition(stage: Stage) -> EpisodeState {
    match stage {
        Stage::Download => EpisodeState::Downloaded,
        Stage::Downsample => EpisodeState::Downsampled,
        Stage::Transcribe => EpisodeState::Transcribed,
        Stage::Clean => EpisodeState::Cleaned,
        Stage::Summarize => EpisodeState::Summarized,
    }
}

/// The stage whose precondition matches `state`, i.e. the stage to run
/// next for an episode currently in `state`. `None` if the episode is
/// already fully summarized.
pub fn stage_for_state(state: EpisodeState) -> Option<Stage> {
    Stage::ALL.into_iter().find(|&s| precondition(s) == state)
}

/// Whether a handler succeeding at `stage` should enqueue `stage.next()`.
///
/// True iff `run_full_pipeline` is set, a next stage exists, and `stage`
/// has not yet reached `target_state` -- testable property 6.
pub fn should_chain(run_full_pipeline: bool, stage: Stage, target_state: Stage) -> bool {
    run_full_pipeline && stage != target_state && stage.next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_postcondition_chain_is_contiguous() {
        for stage in Stage::ALL {
            if let Some(next) = stage.next() {
                assert_eq!(postcondition(stage), precondition(next));
            }
        }
    }

    #[test]
    fn stage_for_state_round_trips_precondition() {
        for stage in Stage::ALL {
            assert_eq!(stage_for_state(precondition(stage)), Some(stage));
        }
    }

    #[test]
    fn stage_for_state_summarized_has_no_next_stage() {
        assert_eq!(stage_for_state(EpisodeState::Summarized), None);
    }

    #[test]
    fn should_chain_true_when_not_yet_at_target() {
        assert!(should_chain(true, Stage::Download, Stage::Summarize));
    }

    #[test]
    fn should_chain_false_without_run_full_pipeline() {
        assert!(!should_chain(false, Stage::Download, Stage::Summarize));
    }

    #[test]
    fn should_chain_false_at_target_state() {
        assert!(!should_chain(true, Stage::Clean, Stage::Clean));
    }

    #[test]
    fn should_chain_false_at_last_stage() {
        assert!(!should_chain(true, Stage::Summarize, Stage::Summarize));
    }
}
