use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use agentflow_core::{GraphId, HandlerContext, NodeId, Payload, RunId};

/// Everything a run needs from its caller.
///
/// Passed explicitly into the engine; nothing is read from ambient state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub graph_id: GraphId,
    /// Caller identity token, forwarded to handlers.
    pub identity: Option<String>,
    /// Run-level input, handed to root nodes.
    pub input: Arc<Payload>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(graph_id: impl Into<GraphId>) -> Self {
        Self {
            run_id: RunId::new(),
            graph_id: graph_id.into(),
            identity: None,
            input: Arc::new(Payload::Null),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = Arc::new(input);
        self
    }

    /// Use a caller-owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context for one handler attempt. Handlers get a child token so they
    /// cannot cancel the run themselves.
    pub fn handler_context(&self, node_id: &NodeId, attempt: u32) -> HandlerContext {
        HandlerContext {
            run_id: self.run_id.clone(),
            node_id: node_id.clone(),
            attempt,
            identity: self.identity.clone(),
            run_input: self.input.clone(),
            cancel: self.cancel.child_token(),
        }
    }
}
