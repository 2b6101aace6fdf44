use agentflow_graph::{Edge, Graph, Node, NodeKind};

/// Build a graph directly, bypassing the editing-session checks.
pub fn graph(nodes: &[(&str, NodeKind)], edges: &[(&str, &str)]) -> Graph {
    Graph {
        nodes: nodes.iter().map(|(id, kind)| Node::new(*id, *kind)).collect(),
        edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
    }
}

/// `A: File Upload -> B: Qdrant <- C: URL Scraper`.
pub fn fan_in_graph() -> Graph {
    graph(
        &[
            ("A", NodeKind::FileUpload),
            ("B", NodeKind::Qdrant),
            ("C", NodeKind::UrlScraper),
        ],
        &[("A", "B"), ("C", "B")],
    )
}

/// `n0 -> n1 -> ... ` of one kind.
pub fn chain(kind: NodeKind, len: usize) -> Graph {
    let ids: Vec<String> = (0..len).map(|i| format!("n{}", i)).collect();
    Graph {
        nodes: ids.iter().map(|id| Node::new(id.as_str(), kind)).collect(),
        edges: ids
            .windows(2)
            .map(|w| Edge::new(w[0].as_str(), w[1].as_str()))
            .collect(),
    }
}
