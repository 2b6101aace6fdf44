use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque data passed between nodes.
pub type Payload = serde_json::Value;

/// Kind-specific node configuration (URL, credentials, prompt text, ...).
pub type NodeConfig = serde_json::Map<String, serde_json::Value>;

/// Outputs of a node's direct predecessors, keyed by predecessor id.
pub type NodeInputs = BTreeMap<NodeId, Payload>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique, immutable node identifier.
    NodeId
);
string_id!(
    /// Identifier of a persisted workflow graph.
    GraphId
);
string_id!(
    /// Identifier of one execution of a graph.
    RunId
);

/// Per-node execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Whole-run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every node succeeded.
    Succeeded,
    /// Some nodes were skipped, none of the attempted ones failed.
    Partial,
    /// At least one attempted node exhausted its retry budget.
    Failed,
    /// The caller cancelled the run before it finished.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Context handed to a node handler for one attempt.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub run_id: RunId,
    pub node_id: NodeId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Caller identity token, passed explicitly rather than read from ambient state.
    pub identity: Option<String>,
    /// Run-level input supplied by whoever started the run.
    pub run_input: Arc<Payload>,
    /// Fires when the run is cancelled. Handlers may observe it to stop early.
    pub cancel: CancellationToken,
}

impl HandlerContext {
    /// A context detached from any run, for invoking a handler directly.
    pub fn detached(node_id: impl Into<NodeId>) -> Self {
        Self {
            run_id: RunId::new(),
            node_id: node_id.into(),
            attempt: 1,
            identity: None,
            run_input: Arc::new(Payload::Null),
            cancel: CancellationToken::new(),
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        graph_id: GraphId,
        stages: usize,
        nodes: usize,
    },
    StageStarted {
        run_id: RunId,
        index: usize,
        nodes: Vec<NodeId>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        attempt: u32,
    },
    NodeRetrying {
        run_id: RunId,
        node_id: NodeId,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    NodeFinished {
        run_id: RunId,
        node_id: NodeId,
        status: NodeStatus,
        attempts: u32,
        elapsed_ms: u64,
    },
    NodeSkipped {
        run_id: RunId,
        node_id: NodeId,
        reason: String,
    },
    RunCompleted {
        run_id: RunId,
        status: RunStatus,
        elapsed_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StageStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeRetrying { run_id, .. }
            | Self::NodeFinished { run_id, .. }
            | Self::NodeSkipped { run_id, .. }
            | Self::RunCompleted { run_id, .. } => run_id,
        }
    }
}
