//! Handler registry -- a named collection of available stage handlers.
//!
//! The registry allows the worker to look up the handler for a claimed
//! task's stage at runtime.

use std::collections::HashMap;

use castqueue_db::models::Stage;

use super::types::Handler;

/// A collection of registered [`Handler`] implementations, keyed by stage.
///
/// # Example
///
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register(DownloadHandler::new());
/// let handler = registry.get(Stage::Download).unwrap();
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Stage, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage handler.
    ///
    /// The handler is stored under the stage returned by [`Handler::stage`].
    /// If a handler for the same stage is already registered, it is
    /// replaced and the old one is returned.
    pub fn register(&mut self, handler: impl Handler + 'static) -> Option<Box<dyn Handler>> {
        let stage = handler.stage();
        self.handlers.insert(stage, Box::new(handler))
    }

    /// Look up the handler for a stage.
    pub fn get(&self, stage: Stage) -> Option<&dyn Handler> {
        self.handlers.get(&stage).map(|b| b.as_ref())
    }

    /// List the stages that have a registered handler.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<Stage> {
        self.handlers.keys().copied().collect()
    }

    /// Return the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("stages", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::HandlerError;
    use crate::handler::types::HandlerContext;
    use async_trait::async_trait;

    struct FakeHandler(Stage);

    #[async_trait]
    impl Handler for FakeHandler {
        fn stage(&self) -> Stage {
            self.0
        }

        async fn execute(&self, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        let old = registry.register(FakeHandler(Stage::Download));
        assert!(old.is_none());

        let handler = registry.get(Stage::Download);
        assert!(handler.is_some());
        assert_eq!(handler.unwrap().stage(), Stage::Download);
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler(Stage::Download));
        let old = registry.register(FakeHandler(Stage::Download));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(Stage::Summarize).is_none());
    }

    #[test]
    fn list_returns_all_registered_stages() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler(Stage::Download));
        registry.register(FakeHandler(Stage::Clean));

        let mut stages = registry.list();
        stages.sort_by_key(|s| s.to_string());
        assert_eq!(stages, vec![Stage::Clean, Stage::Download]);
    }

    #[test]
    fn registry_debug_shows_stages() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler(Stage::Summarize));
        let debug = format!("{registry:?}");
        assert!(debug.contains("Summarize"));
    }
}
