//! Topological scheduler using batched Kahn's algorithm.
//!
//! Each stage holds every node whose predecessors all sit in earlier stages.
//! Nodes within a stage share no edge and may run concurrently. Stages are
//! sorted by ascending node id so that the same graph always yields the same
//! plan.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use agentflow_core::NodeId;

use crate::model::Graph;

/// The graph has a cycle; `node` lies on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected at node {node}")]
pub struct CycleDetected {
    pub node: NodeId,
}

impl From<CycleDetected> for agentflow_core::AgentflowError {
    fn from(e: CycleDetected) -> Self {
        Self::CycleDetected(e.node.to_string())
    }
}

/// Ordered stages of mutually independent nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    stages: Vec<Vec<NodeId>>,
    /// Direct predecessors of every planned node, sorted.
    predecessors: BTreeMap<NodeId, Vec<NodeId>>,
}

impl ExecutionPlan {
    pub fn stages(&self) -> &[Vec<NodeId>] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// Index of the stage holding `id`.
    pub fn stage_of(&self, id: &NodeId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(id))
    }

    pub fn predecessors(&self, id: &NodeId) -> &[NodeId] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Build the staged execution plan for `graph`.
///
/// Edges with a missing endpoint are ignored (the validator reports them) and
/// duplicate edges count once.
pub fn plan(graph: &Graph) -> Result<ExecutionPlan, CycleDetected> {
    let ids: BTreeSet<&NodeId> = graph.nodes.iter().map(|n| &n.id).collect();
    let edges: BTreeSet<(&NodeId, &NodeId)> = graph
        .edges
        .iter()
        .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
        .map(|e| (&e.source, &e.target))
        .collect();

    let mut in_degree: BTreeMap<&NodeId, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut successors: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();
    let mut predecessors: BTreeMap<NodeId, Vec<NodeId>> =
        ids.iter().map(|id| ((*id).clone(), Vec::new())).collect();

    for (source, target) in &edges {
        if let Some(d) = in_degree.get_mut(target) {
            *d += 1;
        }
        successors.entry(*source).or_default().push(*target);
        if let Some(preds) = predecessors.get_mut(*target) {
            preds.push((*source).clone());
        }
    }

    let mut ready: Vec<&NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut stages: Vec<Vec<NodeId>> = Vec::new();

    while !ready.is_empty() {
        ready.sort();
        let mut next = Vec::new();
        for id in &ready {
            for succ in successors.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(succ) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(*succ);
                    }
                }
            }
        }
        stages.push(ready.iter().map(|id| (*id).clone()).collect());
        ready = next;
    }

    let scheduled: usize = stages.iter().map(Vec::len).sum();
    if scheduled < ids.len() {
        let node = find_cycle_node(&in_degree, &predecessors);
        debug!(node_id = %node, "Cycle detected while planning");
        return Err(CycleDetected { node });
    }

    Ok(ExecutionPlan {
        stages,
        predecessors,
    })
}

/// Walk residual predecessors from the smallest residual node until a node
/// repeats; that node is on a cycle rather than merely downstream of one.
fn find_cycle_node(
    in_degree: &BTreeMap<&NodeId, usize>,
    predecessors: &BTreeMap<NodeId, Vec<NodeId>>,
) -> NodeId {
    let residual: BTreeSet<&NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d > 0)
        .map(|(id, _)| *id)
        .collect();

    let Some(mut current) = residual.iter().next().copied() else {
        // Unreachable when called after an incomplete schedule.
        return NodeId::from("");
    };
    let mut seen = BTreeSet::new();
    while seen.insert(current) {
        let next = predecessors
            .get(current)
            .and_then(|preds| preds.iter().filter(|p| residual.contains(p)).min());
        match next {
            Some(p) => current = p,
            None => break,
        }
    }
    current.clone()
}
