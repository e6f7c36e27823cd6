//! Placeholder stage handlers wired into `castqueue worker`.
//!
//! The actual stage business logic -- HTTP download, audio resampling,
//! speech-to-text, LLM summarization -- is explicitly out of scope (see
//! spec.md §1): "treated as opaque handlers that honor the classification
//! contract." A real deployment registers its own [`Handler`] per stage;
//! these stand-ins exist so `castqueue worker` has something to run and
//! report progress through, and so the CLI/HTTP surface can be exercised
//! end to end without an external pipeline wired up.

use async_trait::async_trait;

use castqueue_core::classify::HandlerError;
use castqueue_core::handler::{Handler, HandlerContext, HandlerRegistry};
use castqueue_db::models::Stage;

struct PassthroughHandler(Stage);

#[async_trait]
impl Handler for PassthroughHandler {
    fn stage(&self) -> Stage {
        self.0
    }

    async fn execute(&self, ctx: &HandlerContext) -> Result<(), HandlerError> {
        ctx.report(Some(100.0), format!("{} stage placeholder handler ran", self.0))
            .await;
        Ok(())
    }
}

/// Build a registry with a passthrough handler for every stage.
pub fn passthrough_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for stage in Stage::ALL {
        registry.register(PassthroughHandler(stage));
    }
    registry
}
