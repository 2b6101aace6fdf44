use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentflow_core::{GraphId, HandlerError, NodeId, NodeStatus, Payload, RunId, RunStatus};
use agentflow_graph::{Graph, NodeKind};
use agentflow_handlers::InvokeFailure;

/// Why a node produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    Timeout,
    HandlerMissing,
    Cancelled,
    /// Not attempted because a predecessor failed or was skipped.
    Upstream,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    pub kind: FailureKind,
    pub message: String,
}

impl NodeError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<InvokeFailure> for NodeError {
    fn from(failure: InvokeFailure) -> Self {
        let kind = match &failure {
            InvokeFailure::Missing(_) => FailureKind::HandlerMissing,
            InvokeFailure::TimedOut(_) => FailureKind::Timeout,
            InvokeFailure::Handler(HandlerError::Transient(_)) => FailureKind::Transient,
            InvokeFailure::Handler(HandlerError::Permanent(_)) => FailureKind::Permanent,
        };
        let message = match failure {
            InvokeFailure::Handler(e) => e.message().to_string(),
            other => other.to_string(),
        };
        Self { kind, message }
    }
}

/// Outcome of one node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRun {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Handler attempts made, retries included.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

impl NodeRun {
    pub fn pending(node_id: NodeId, kind: NodeKind) -> Self {
        Self {
            node_id,
            kind,
            status: NodeStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn skip(&mut self, error: Option<NodeError>) {
        self.status = NodeStatus::Skipped;
        self.output = None;
        self.error = error;
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }
}

/// Result of executing a graph. Partial results are always kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub graph_id: GraphId,
    pub status: RunStatus,
    pub stages: Vec<Vec<NodeId>>,
    pub nodes: BTreeMap<NodeId, NodeRun>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn node(&self, id: &str) -> Option<&NodeRun> {
        self.nodes.get(&NodeId::from(id))
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }

    pub fn output_of(&self, id: &str) -> Option<&Payload> {
        self.node(id).and_then(|n| n.output.as_ref())
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeRun> {
        self.nodes.values().filter(|n| n.status == NodeStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Run-level outcome from the final node states.
///
/// A failed node fails the run unless one of its direct successors is a
/// `continue_on_error` kind that went on to run; such a contained failure,
/// like any skipped node, makes the run partial.
pub(crate) fn run_status(nodes: &BTreeMap<NodeId, NodeRun>, graph: &Graph, cancelled: bool) -> RunStatus {
    if cancelled {
        return RunStatus::Cancelled;
    }
    let contained = |id: &NodeId| {
        graph.outgoing(id).any(|edge| {
            nodes.get(&edge.target).is_some_and(|next| {
                next.kind.spec().continue_on_error
                    && matches!(next.status, NodeStatus::Succeeded | NodeStatus::Failed)
            })
        })
    };

    let mut partial = false;
    for node in nodes.values() {
        match node.status {
            NodeStatus::Failed if !contained(&node.node_id) => return RunStatus::Failed,
            NodeStatus::Failed | NodeStatus::Skipped => partial = true,
            _ => {}
        }
    }
    if partial {
        RunStatus::Partial
    } else {
        RunStatus::Succeeded
    }
}
