use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentflow_core::{AgentflowError, GraphId, Result};
use agentflow_graph::Graph;

/// Publish state kept alongside a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// True while the stored snapshot is the one last published.
    pub published: bool,
    pub last_published: Option<DateTime<Utc>>,
    pub publish_count: u32,
}

impl PublishRecord {
    pub(crate) fn stamp(&mut self, at: DateTime<Utc>) {
        self.published = true;
        self.last_published = Some(at);
        self.publish_count += 1;
    }
}

/// A persisted graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredGraph {
    pub id: GraphId,
    pub title: String,
    pub graph: Graph,
    pub version: u64,
    pub publish: PublishRecord,
    pub updated_at: DateTime<Utc>,
}

/// Listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub id: GraphId,
    pub title: String,
    pub version: u64,
    pub nodes: usize,
    pub edges: usize,
    pub published: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredGraph> for GraphSummary {
    fn from(stored: &StoredGraph) -> Self {
        Self {
            id: stored.id.clone(),
            title: stored.title.clone(),
            version: stored.version,
            nodes: stored.graph.nodes.len(),
            edges: stored.graph.edges.len(),
            published: stored.publish.published,
            updated_at: stored.updated_at,
        }
    }
}

/// Optimistic concurrency check shared by the store implementations.
/// A missing graph has version 0.
pub(crate) fn check_version(id: &GraphId, current: u64, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != current => Err(AgentflowError::Conflict {
            graph_id: id.to_string(),
            expected,
            actual: current,
        }),
        _ => Ok(()),
    }
}
