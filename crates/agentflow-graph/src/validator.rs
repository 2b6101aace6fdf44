//! Structural validation of workflow graphs.
//!
//! `check_edge` decides whether one new edge is admissible; rules are applied
//! in a fixed order and the first failing rule names the rejection.
//! `validate_graph` audits a whole snapshot (e.g. one loaded from storage) and
//! reports every violation it finds.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentflow_core::config::PublishConfig;
use agentflow_core::NodeId;

use crate::kind::{MaxIncoming, NodeKind};
use crate::model::Graph;
use crate::scheduler;

/// Why a mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRejected {
    #[error("edge endpoint does not exist")]
    UnknownNode,
    #[error("edge would connect a node to itself")]
    SelfLoop,
    #[error("edge already exists")]
    DuplicateEdge,
    #[error("source already has an outgoing edge")]
    FanOutExceeded,
    #[error("target does not accept more incoming edges")]
    FanInExceeded,
    #[error("node kinds cannot be connected")]
    KindMismatch,
    #[error("graph already has a Trigger node")]
    SecondTrigger,
    #[error("node id already exists")]
    DuplicateNode,
}

impl From<EdgeRejected> for agentflow_core::AgentflowError {
    fn from(e: EdgeRejected) -> Self {
        Self::InvalidGraph(e.to_string())
    }
}

/// Check whether a node of `kind` may be added to `graph`.
pub fn check_new_node(graph: &Graph, kind: NodeKind) -> Result<(), EdgeRejected> {
    if kind == NodeKind::Trigger && graph.trigger().is_some() {
        return Err(EdgeRejected::SecondTrigger);
    }
    Ok(())
}

/// Decide whether `source -> target` may be added to `graph`.
pub fn check_edge(graph: &Graph, source: &NodeId, target: &NodeId) -> Result<(), EdgeRejected> {
    let (Some(s), Some(t)) = (graph.node(source), graph.node(target)) else {
        return Err(EdgeRejected::UnknownNode);
    };
    if source == target {
        return Err(EdgeRejected::SelfLoop);
    }
    if graph.has_edge(source, target) {
        return Err(EdgeRejected::DuplicateEdge);
    }
    // A single Trigger is enforced when nodes are added; this only fires for
    // snapshots that already carry more than one.
    if t.is_trigger() && graph.triggers().any(|n| &n.id != target) {
        return Err(EdgeRejected::SecondTrigger);
    }

    let incoming = graph.incoming(target).count();
    match t.kind.spec().max_incoming {
        MaxIncoming::Zero => return Err(EdgeRejected::KindMismatch),
        limit if !limit.admits(incoming) => return Err(EdgeRejected::FanInExceeded),
        _ => {}
    }

    // Condition nodes branch to anything.
    if s.kind == NodeKind::Condition {
        return Ok(());
    }
    if !NodeKind::accepts(s.kind, t.kind) {
        return Err(EdgeRejected::KindMismatch);
    }
    if NodeKind::is_sanctioned_pair(s.kind, t.kind) {
        return Ok(());
    }
    // Sanctioned pairs already leaving the source do not use up its one edge.
    let loose = graph.outgoing(source).any(|e| {
        graph
            .node(&e.target)
            .is_some_and(|n| !NodeKind::is_sanctioned_pair(s.kind, n.kind))
    });
    if !loose {
        return Ok(());
    }
    Err(EdgeRejected::FanOutExceeded)
}

/// Boolean form of [`check_edge`].
pub fn can_connect(graph: &Graph, source: &NodeId, target: &NodeId) -> bool {
    check_edge(graph, source, target).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    Cycle,
    DuplicateNode,
    DanglingEdge,
    SelfLoop,
    DuplicateEdge,
    MultipleTriggers,
    KindMismatch,
    FanInExceeded,
    FanOutExceeded,
    OrphanNode,
    EmptyGraph,
    TooManyEdges,
    MissingTrigger,
    NoEdges,
}

/// One problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    /// Nodes involved, sorted.
    pub nodes: Vec<NodeId>,
    pub severity: Severity,
    pub message: String,
}

impl Violation {
    fn fatal(code: ViolationCode, nodes: Vec<NodeId>, message: impl Into<String>) -> Self {
        Self::new(code, nodes, Severity::Fatal, message)
    }

    fn warning(code: ViolationCode, nodes: Vec<NodeId>, message: impl Into<String>) -> Self {
        Self::new(code, nodes, Severity::Warning, message)
    }

    fn new(code: ViolationCode, mut nodes: Vec<NodeId>, severity: Severity, message: impl Into<String>) -> Self {
        nodes.sort();
        Self {
            code,
            nodes,
            severity,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Fatal => "error",
        };
        write!(f, "{}: {}", level, self.message)
    }
}

pub fn has_fatal(violations: &[Violation]) -> bool {
    violations.iter().any(Violation::is_fatal)
}

/// Audit a whole graph. Same graph in, same list out.
///
/// Orphans (nodes unreachable from the Trigger) are warnings and only reported
/// when a Trigger exists; a graph without one is a valid on-demand pipeline.
pub fn validate_graph(graph: &Graph) -> Vec<Violation> {
    let mut out = Vec::new();

    let mut seen_ids = BTreeSet::new();
    let mut dup_ids = BTreeSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(&node.id) {
            dup_ids.insert(node.id.clone());
        }
    }
    for id in dup_ids {
        out.push(Violation::fatal(
            ViolationCode::DuplicateNode,
            vec![id.clone()],
            format!("node id {} is used more than once", id),
        ));
    }

    let triggers: Vec<NodeId> = graph.triggers().map(|n| n.id.clone()).collect();
    if triggers.len() > 1 {
        out.push(Violation::fatal(
            ViolationCode::MultipleTriggers,
            triggers,
            "graph has more than one Trigger node",
        ));
    }

    let mut seen_edges = BTreeSet::new();
    let mut incoming: BTreeMap<&NodeId, usize> = BTreeMap::new();
    let mut loose_outgoing: BTreeMap<&NodeId, usize> = BTreeMap::new();
    for edge in &graph.edges {
        let (Some(s), Some(t)) = (graph.node(&edge.source), graph.node(&edge.target)) else {
            out.push(Violation::fatal(
                ViolationCode::DanglingEdge,
                vec![edge.source.clone(), edge.target.clone()],
                format!("edge {} -> {} references a missing node", edge.source, edge.target),
            ));
            continue;
        };
        if edge.is_self_loop() {
            out.push(Violation::fatal(
                ViolationCode::SelfLoop,
                vec![edge.source.clone()],
                format!("node {} is connected to itself", edge.source),
            ));
            continue;
        }
        if !seen_edges.insert((&edge.source, &edge.target)) {
            out.push(Violation::fatal(
                ViolationCode::DuplicateEdge,
                vec![edge.source.clone(), edge.target.clone()],
                format!("edge {} -> {} appears more than once", edge.source, edge.target),
            ));
            continue;
        }

        *incoming.entry(&edge.target).or_insert(0) += 1;
        if s.kind == NodeKind::Condition {
            continue;
        }
        if !NodeKind::accepts(s.kind, t.kind) {
            out.push(Violation::fatal(
                ViolationCode::KindMismatch,
                vec![edge.source.clone(), edge.target.clone()],
                format!("{} cannot feed {}", s.kind, t.kind),
            ));
        }
        if !NodeKind::is_sanctioned_pair(s.kind, t.kind) {
            *loose_outgoing.entry(&edge.source).or_insert(0) += 1;
        }
    }

    for (id, count) in &incoming {
        let Some(node) = graph.node(id) else { continue };
        if !node.kind.spec().max_incoming.admits(count - 1) {
            out.push(Violation::fatal(
                ViolationCode::FanInExceeded,
                vec![(*id).clone()],
                format!("{} node {} has {} incoming edges", node.kind, id, count),
            ));
        }
    }
    for (id, count) in &loose_outgoing {
        if *count > 1 {
            out.push(Violation::fatal(
                ViolationCode::FanOutExceeded,
                vec![(*id).clone()],
                format!("node {} has {} outgoing edges", id, count),
            ));
        }
    }

    if let Err(cycle) = scheduler::plan(graph) {
        out.push(Violation::fatal(
            ViolationCode::Cycle,
            vec![cycle.node.clone()],
            format!("graph contains a cycle through node {}", cycle.node),
        ));
    }

    if let Some(trigger) = graph.trigger() {
        let reached = reachable_from(graph, &trigger.id);
        for node in &graph.nodes {
            if !reached.contains(&node.id) {
                out.push(Violation::warning(
                    ViolationCode::OrphanNode,
                    vec![node.id.clone()],
                    format!("node {} is unreachable from the Trigger", node.id),
                ));
            }
        }
    }

    out.sort();
    out.dedup();
    out
}

/// Structural audit plus the publish-time gates: non-empty graph, the
/// `n * (n - 1) / 2` edge cap, and the optional Trigger / edge requirements.
pub fn validate_for_publish(graph: &Graph, rules: &PublishConfig) -> Vec<Violation> {
    let mut out = validate_graph(graph);

    if graph.nodes.is_empty() {
        out.push(Violation::fatal(ViolationCode::EmptyGraph, vec![], "graph has no nodes"));
    }
    if graph.edges.len() > graph.edge_cap() {
        out.push(Violation::fatal(
            ViolationCode::TooManyEdges,
            vec![],
            format!(
                "graph has {} edges, more than the {} allowed for {} nodes",
                graph.edges.len(),
                graph.edge_cap(),
                graph.nodes.len()
            ),
        ));
    }
    if rules.require_trigger && graph.trigger().is_none() {
        out.push(Violation::fatal(ViolationCode::MissingTrigger, vec![], "graph has no Trigger node"));
    }
    if rules.require_edges && graph.edges.is_empty() {
        out.push(Violation::fatal(ViolationCode::NoEdges, vec![], "graph has no edges"));
    }

    out.sort();
    out
}

fn reachable_from<'a>(graph: &'a Graph, start: &'a NodeId) -> BTreeSet<&'a NodeId> {
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for edge in graph.outgoing(id) {
            if seen.insert(&edge.target) {
                queue.push_back(&edge.target);
            }
        }
    }
    seen
}
