use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;

use agentflow_core::{AgentflowError, GraphId, Result};
use agentflow_graph::Graph;

use crate::record::{check_version, GraphSummary, PublishRecord, StoredGraph};
use crate::GraphStore;

/// Process-local graph store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryGraphStore {
    graphs: Mutex<HashMap<GraphId, StoredGraph>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<GraphId, StoredGraph>>> {
        self.graphs
            .lock()
            .map_err(|e| AgentflowError::Database(e.to_string()))
    }
}

impl GraphStore for MemoryGraphStore {
    fn load(&self, id: &GraphId) -> BoxFuture<'_, Result<StoredGraph>> {
        let id = id.clone();
        Box::pin(async move {
            self.lock()?
                .get(&id)
                .cloned()
                .ok_or_else(|| AgentflowError::GraphNotFound(id.to_string()))
        })
    }

    fn save(
        &self,
        id: &GraphId,
        title: &str,
        graph: &Graph,
        expected_version: Option<u64>,
    ) -> BoxFuture<'_, Result<u64>> {
        let id = id.clone();
        let title = title.to_string();
        let graph = graph.clone();
        Box::pin(async move {
            let mut graphs = self.lock()?;
            let current = graphs.get(&id);
            check_version(&id, current.map_or(0, |g| g.version), expected_version)?;

            if let Some(existing) = current {
                if existing.graph == graph && existing.title == title {
                    return Ok(existing.version);
                }
            }

            let (version, mut publish) = match current {
                Some(existing) => (existing.version + 1, existing.publish.clone()),
                None => (1, PublishRecord::default()),
            };
            publish.published = false;
            graphs.insert(
                id.clone(),
                StoredGraph {
                    id,
                    title,
                    graph,
                    version,
                    publish,
                    updated_at: Utc::now(),
                },
            );
            Ok(version)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<GraphSummary>>> {
        Box::pin(async move {
            let graphs = self.lock()?;
            let mut out: Vec<GraphSummary> = graphs.values().map(GraphSummary::from).collect();
            out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
            Ok(out)
        })
    }

    fn delete(&self, id: &GraphId) -> BoxFuture<'_, Result<bool>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.lock()?.remove(&id).is_some()) })
    }

    fn mark_published(&self, id: &GraphId, version: u64) -> BoxFuture<'_, Result<PublishRecord>> {
        let id = id.clone();
        Box::pin(async move {
            let mut graphs = self.lock()?;
            let stored = graphs
                .get_mut(&id)
                .ok_or_else(|| AgentflowError::GraphNotFound(id.to_string()))?;
            check_version(&id, stored.version, Some(version))?;
            stored.publish.stamp(Utc::now());
            Ok(stored.publish.clone())
        })
    }
}
