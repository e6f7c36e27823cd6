//! The `Handler` trait -- the adapter interface for stage implementations.
//!
//! Each pipeline stage (download, downsample, transcribe, clean, summarize)
//! implements this trait. The trait is intentionally object-safe so it can
//! be stored as `Box<dyn Handler>` in the [`super::HandlerRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use castqueue_db::models::{Stage, Task};

use crate::classify::HandlerError;
use crate::progress::{ProgressBus, ProgressEvent};

/// Everything a handler needs to process one claimed task.
#[derive(Clone)]
pub struct HandlerContext {
    pub task: Task,
    pub progress: Arc<ProgressBus>,
    pub cancel: CancellationToken,
}

impl HandlerContext {
    /// Report non-terminal progress for this task.
    pub async fn report(&self, progress_pct: Option<f32>, message: impl Into<String>) {
        self.progress
            .publish(ProgressEvent {
                task_id: self.task.id,
                stage: self.task.stage,
                progress_pct,
                message: Some(message.into()),
                estimated_remaining_seconds: None,
                terminal: false,
            })
            .await;
    }

    pub fn task_id(&self) -> Uuid {
        self.task.id
    }

    pub fn episode_id(&self) -> Uuid {
        self.task.episode_id
    }

    pub fn metadata(&self) -> &Value {
        &self.task.metadata
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Adapter interface for a single pipeline stage's processing logic.
///
/// Implementors perform the actual work (download audio, run a transcription
/// model, call an LLM summarizer, ...) and either complete normally or
/// return a [`HandlerError`] for the worker to classify and act on.
///
/// # Object Safety
///
/// This trait is object-safe: every method returns a concrete (or boxed)
/// type, so `Box<dyn Handler>` can be stored in [`super::HandlerRegistry`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// The stage this handler implements.
    fn stage(&self) -> Stage;

    /// Execute the stage's work for the task in `ctx`.
    ///
    /// Implementations should periodically check `ctx.is_cancelled()` and
    /// return `Err(HandlerError::Cancelled)` promptly if it flips true.
    async fn execute(&self, ctx: &HandlerContext) -> Result<(), HandlerError>;
}

// Compile-time assertion: Handler must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Handler) {}
};
