use serde::{Deserialize, Serialize};
use tracing::debug;

use agentflow_core::{NodeConfig, NodeId};

use crate::edge::Edge;
use crate::kind::NodeKind;
use crate::node::{Node, Position};
use crate::validator::{self, EdgeRejected};

/// Nodes and edges of one workflow.
///
/// This is the persisted and planned form. Insertion order is kept so that
/// snapshots serialize identically across save/load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn has_edge(&self, source: &NodeId, target: &NodeId) -> bool {
        self.edges
            .iter()
            .any(|e| &e.source == source && &e.target == target)
    }

    /// Edges leaving `id`.
    pub fn outgoing<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source == id)
    }

    /// Edges entering `id`.
    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.target == id)
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_trigger())
    }

    /// The Trigger node, if the graph has one.
    pub fn trigger(&self) -> Option<&Node> {
        self.triggers().next()
    }

    /// Publish-time density cap: `n * (n - 1) / 2`.
    pub fn edge_cap(&self) -> usize {
        let n = self.nodes.len();
        n * n.saturating_sub(1) / 2
    }

    pub fn from_json(input: &str) -> agentflow_core::Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn to_json(&self) -> agentflow_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// An editing session over one workflow graph.
///
/// Every mutation keeps the structural invariants: edge endpoints exist, no
/// self loops, no duplicate edges, at most one Trigger, and the fan-out rules.
/// A rejected mutation leaves the graph untouched.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    graph: Graph,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an editing session over a persisted snapshot.
    ///
    /// Nodes are taken as-is (a second Trigger is rejected); edges are re-added
    /// one by one through the validator, so an inadmissible edge fails the load.
    pub fn from_graph(graph: Graph) -> Result<Self, EdgeRejected> {
        let mut session = Self::new();
        for node in graph.nodes {
            session.insert_node(node)?;
        }
        for edge in graph.edges {
            session.add_edge(&edge.source, &edge.target)?;
        }
        Ok(session)
    }

    /// Add a node of `kind`. Config entries are merged over the kind defaults.
    ///
    /// Only fails with `SecondTrigger` when adding a Trigger to a graph that
    /// already has one.
    pub fn add_node(&mut self, kind: NodeKind, config: NodeConfig) -> Result<NodeId, EdgeRejected> {
        let node = Node::new(NodeId::new(), kind).with_config(config);
        self.insert_node(node)
    }

    /// Add a fully built node. Duplicate ids are rejected as `DuplicateNode`.
    pub fn insert_node(&mut self, node: Node) -> Result<NodeId, EdgeRejected> {
        if self.graph.contains_node(&node.id) {
            return Err(EdgeRejected::DuplicateNode);
        }
        validator::check_new_node(&self.graph, node.kind)?;
        debug!(node_id = %node.id, kind = %node.kind, "Node added");
        let id = node.id.clone();
        self.graph.nodes.push(node);
        Ok(id)
    }

    /// Remove a node and every incident edge. No-op if absent.
    pub fn remove_node(&mut self, id: &NodeId) {
        let before = self.graph.nodes.len();
        self.graph.nodes.retain(|n| &n.id != id);
        if self.graph.nodes.len() != before {
            self.graph.edges.retain(|e| !e.touches(id));
            debug!(node_id = %id, "Node removed");
        }
    }

    /// Connect `source` to `target` if the validator admits it.
    pub fn add_edge(&mut self, source: &NodeId, target: &NodeId) -> Result<(), EdgeRejected> {
        validator::check_edge(&self.graph, source, target)?;
        self.graph.edges.push(Edge::new(source.clone(), target.clone()));
        debug!(source = %source, target = %target, "Edge added");
        Ok(())
    }

    /// Remove an edge. No-op if absent.
    pub fn remove_edge(&mut self, source: &NodeId, target: &NodeId) {
        self.graph
            .edges
            .retain(|e| !(&e.source == source && &e.target == target));
    }

    /// Replace a node's config (config-form submission).
    pub fn update_config(&mut self, id: &NodeId, config: NodeConfig) -> Result<(), EdgeRejected> {
        let node = self
            .graph
            .nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or(EdgeRejected::UnknownNode)?;
        node.config = config;
        Ok(())
    }

    /// Move a node on the canvas.
    pub fn move_node(&mut self, id: &NodeId, position: Position) -> Result<(), EdgeRejected> {
        let node = self
            .graph
            .nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or(EdgeRejected::UnknownNode)?;
        node.position = position;
        Ok(())
    }

    /// Deep, independent copy for persistence or planning.
    pub fn snapshot(&self) -> Graph {
        self.graph.clone()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.graph.node(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub fn trigger(&self) -> Option<&Node> {
        self.graph.trigger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(nodes: &[(&str, NodeKind)]) -> WorkflowGraph {
        let mut wf = WorkflowGraph::new();
        for (id, kind) in nodes {
            wf.insert_node(Node::new(*id, *kind)).unwrap();
        }
        wf
    }

    #[test]
    fn test_add_node_generates_fresh_ids() {
        let mut wf = WorkflowGraph::new();
        let a = wf.add_node(NodeKind::Action, NodeConfig::new()).unwrap();
        let b = wf.add_node(NodeKind::Action, NodeConfig::new()).unwrap();
        assert_ne!(a, b);
        assert_eq!(wf.nodes().len(), 2);
    }

    #[test]
    fn test_second_trigger_rejected_at_add_time() {
        let mut wf = WorkflowGraph::new();
        wf.add_node(NodeKind::Trigger, NodeConfig::new()).unwrap();
        let err = wf.add_node(NodeKind::Trigger, NodeConfig::new()).unwrap_err();
        assert_eq!(err, EdgeRejected::SecondTrigger);
        assert_eq!(wf.nodes().len(), 1);
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let mut wf = session_with(&[("a", NodeKind::Action)]);
        let err = wf.insert_node(Node::new("a", NodeKind::Email)).unwrap_err();
        assert_eq!(err, EdgeRejected::DuplicateNode);
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let mut wf = session_with(&[
            ("t", NodeKind::Trigger),
            ("a", NodeKind::Condition),
            ("b", NodeKind::Email),
            ("c", NodeKind::Slack),
        ]);
        wf.add_edge(&"t".into(), &"a".into()).unwrap();
        wf.add_edge(&"a".into(), &"b".into()).unwrap();
        wf.add_edge(&"a".into(), &"c".into()).unwrap();

        wf.remove_node(&"a".into());
        assert_eq!(wf.nodes().len(), 3);
        assert!(wf.edges().is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut wf = session_with(&[("a", NodeKind::Action), ("b", NodeKind::Email)]);
        wf.add_edge(&"a".into(), &"b".into()).unwrap();
        let before = wf.snapshot();

        wf.remove_node(&"missing".into());
        wf.remove_edge(&"b".into(), &"a".into());
        assert_eq!(wf.snapshot(), before);
    }

    #[test]
    fn test_rejected_edge_leaves_graph_unchanged() {
        let mut wf = session_with(&[
            ("a", NodeKind::Gpt4o),
            ("b", NodeKind::Email),
            ("c", NodeKind::Slack),
        ]);
        wf.add_edge(&"a".into(), &"b".into()).unwrap();
        let before = serde_json::to_vec(&wf.snapshot()).unwrap();

        for (s, t) in [("a", "c"), ("a", "a"), ("a", "b"), ("a", "zz")] {
            assert!(wf.add_edge(&s.into(), &t.into()).is_err());
            assert_eq!(serde_json::to_vec(&wf.snapshot()).unwrap(), before);
        }
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut wf = session_with(&[("a", NodeKind::Action)]);
        let snap = wf.snapshot();
        wf.remove_node(&"a".into());
        assert_eq!(snap.nodes.len(), 1);
        assert!(wf.nodes().is_empty());
    }

    #[test]
    fn test_update_config_and_move() {
        let mut wf = session_with(&[("u", NodeKind::UrlScraper)]);
        let mut config = NodeConfig::new();
        config.insert("urlSearch".into(), serde_json::json!("https://rust-lang.org"));
        wf.update_config(&"u".into(), config).unwrap();
        wf.move_node(&"u".into(), Position { x: 1.0, y: 2.0 }).unwrap();

        let node = wf.node(&"u".into()).unwrap();
        assert_eq!(node.config["urlSearch"], "https://rust-lang.org");
        assert_eq!(node.position.x, 1.0);

        assert_eq!(
            wf.update_config(&"nope".into(), NodeConfig::new()),
            Err(EdgeRejected::UnknownNode)
        );
    }

    #[test]
    fn test_from_graph_revalidates_edges() {
        let mut graph = Graph::new();
        graph.nodes.push(Node::new("a", NodeKind::Gpt4o));
        graph.nodes.push(Node::new("b", NodeKind::Email));
        graph.nodes.push(Node::new("c", NodeKind::Slack));
        graph.edges.push(Edge::new("a", "b"));
        assert!(WorkflowGraph::from_graph(graph.clone()).is_ok());

        graph.edges.push(Edge::new("a", "c"));
        assert_eq!(
            WorkflowGraph::from_graph(graph).unwrap_err(),
            EdgeRejected::FanOutExceeded
        );
    }

    #[test]
    fn test_from_graph_agrees_with_validator_on_fan_out() {
        let fan_out = |g: &Graph| {
            validator::validate_graph(g)
                .iter()
                .any(|v| v.code == validator::ViolationCode::FanOutExceeded)
        };
        let nodes = [
            Node::new("file", NodeKind::FileUpload),
            Node::new("vectors", NodeKind::Qdrant),
            Node::new("llm", NodeKind::Gpt4o),
            Node::new("o1", NodeKind::GptO1),
        ];
        let cases: [&[(&str, &str)]; 4] = [
            &[("file", "vectors"), ("file", "llm")],
            &[("file", "llm"), ("file", "vectors")],
            &[("file", "llm"), ("file", "o1")],
            &[("file", "vectors"), ("file", "llm"), ("file", "o1")],
        ];
        for edges in cases {
            let graph = Graph {
                nodes: nodes.to_vec(),
                edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
            };
            let loaded = WorkflowGraph::from_graph(graph.clone());
            assert_eq!(loaded.is_ok(), !fan_out(&graph), "edges {:?}", edges);
        }
    }

    #[test]
    fn test_graph_json_roundtrip_preserves_order() {
        let mut wf = session_with(&[("z", NodeKind::Trigger), ("a", NodeKind::Action)]);
        wf.add_edge(&"z".into(), &"a".into()).unwrap();
        let json = wf.snapshot().to_json().unwrap();
        let parsed = Graph::from_json(&json).unwrap();
        assert_eq!(parsed, wf.snapshot());
        assert_eq!(parsed.nodes[0].id, NodeId::from("z"));
    }

    #[test]
    fn test_edge_cap() {
        let wf = session_with(&[
            ("a", NodeKind::Action),
            ("b", NodeKind::Action),
            ("c", NodeKind::Action),
        ]);
        assert_eq!(wf.graph().edge_cap(), 3);
        assert_eq!(Graph::new().edge_cap(), 0);
    }
}
