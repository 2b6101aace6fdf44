use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use agentflow_core::config::HandlersConfig;
use agentflow_core::traits::NodeHandler;
use agentflow_core::{HandlerContext, HandlerError, NodeConfig, NodeInputs, Payload};
use agentflow_graph::NodeKind;

use crate::builtin::{ConditionHandler, PassthroughHandler, UrlScraperHandler, WaitHandler};

/// Why a single handler invocation produced no output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeFailure {
    #[error("no handler registered for {0}")]
    Missing(NodeKind),
    #[error("handler timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Registry of node handlers, one per kind.
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: NodeKind, handler: impl NodeHandler) {
        self.register_arc(kind, Arc::new(handler));
    }

    /// Register a shared handler, e.g. one the caller keeps a handle to.
    pub fn register_arc(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        debug!(kind = %kind, handler = handler.name(), "Registering handler");
        self.handlers.insert(kind, handler);
    }

    pub fn unregister(&mut self, kind: NodeKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds, in registry-table order.
    pub fn kinds(&self) -> Vec<NodeKind> {
        let mut kinds: Vec<NodeKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Run one attempt of the handler for `kind`, bounded by `timeout`.
    pub async fn invoke(
        &self,
        kind: NodeKind,
        ctx: HandlerContext,
        config: NodeConfig,
        inputs: NodeInputs,
        timeout: Duration,
    ) -> Result<Payload, InvokeFailure> {
        let handler = self.get(kind).ok_or(InvokeFailure::Missing(kind))?;

        match tokio::time::timeout(timeout, handler.invoke(ctx, config, inputs)).await {
            Ok(result) => result.map_err(InvokeFailure::Handler),
            Err(_) => Err(InvokeFailure::TimedOut(timeout)),
        }
    }

    /// Create a registry with the built-in handlers registered.
    ///
    /// Kinds that talk to third-party services (LLMs, vector stores, chat
    /// apps) are left for the embedding application to register.
    pub fn with_builtins(config: &HandlersConfig) -> Self {
        let mut registry = Self::new();

        registry.register(NodeKind::Trigger, PassthroughHandler);
        registry.register(NodeKind::Action, PassthroughHandler);
        registry.register(NodeKind::Condition, ConditionHandler);
        registry.register(NodeKind::Wait, WaitHandler);
        registry.register(NodeKind::UrlScraper, UrlScraperHandler::new(config.clone()));

        registry
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_test_utils::ScriptedHandler;

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::with_builtins(&HandlersConfig::default());
        assert_eq!(
            registry.kinds(),
            vec![
                NodeKind::UrlScraper,
                NodeKind::Condition,
                NodeKind::Trigger,
                NodeKind::Action,
                NodeKind::Wait,
            ]
        );
        assert!(!registry.contains(NodeKind::Gpt4o));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(NodeKind::Email, ScriptedHandler::always_ok(serde_json::json!(1)));
        registry.register(NodeKind::Email, PassthroughHandler);
        assert_eq!(registry.get(NodeKind::Email).unwrap().name(), "passthrough");
        assert!(registry.unregister(NodeKind::Email));
        assert!(!registry.unregister(NodeKind::Email));
    }

    #[tokio::test]
    async fn test_invoke_missing_handler() {
        let registry = HandlerRegistry::new();
        let err = registry
            .invoke(
                NodeKind::Slack,
                HandlerContext::detached("n"),
                NodeConfig::new(),
                NodeInputs::new(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err, InvokeFailure::Missing(NodeKind::Slack));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            NodeKind::Docker,
            ScriptedHandler::always_ok(serde_json::json!("late")).with_delay(Duration::from_secs(10)),
        );
        let err = registry
            .invoke(
                NodeKind::Docker,
                HandlerContext::detached("n"),
                NodeConfig::new(),
                NodeInputs::new(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err, InvokeFailure::TimedOut(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_invoke_passes_handler_error_through() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            NodeKind::Notion,
            ScriptedHandler::new(vec![Err(HandlerError::transient("busy"))]),
        );
        let err = registry
            .invoke(
                NodeKind::Notion,
                HandlerContext::detached("n"),
                NodeConfig::new(),
                NodeInputs::new(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err, InvokeFailure::Handler(HandlerError::transient("busy")));
    }
}
