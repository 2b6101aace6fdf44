use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use agentflow_core::config::PublishConfig;
use agentflow_core::{AgentflowError, GraphId, Result, RunStatus};
use agentflow_graph::{has_fatal, validate_for_publish, validate_graph, Graph, Violation};
use agentflow_store::{GraphStore, GraphSummary, PublishRecord, StoredGraph};

use crate::context::RunContext;
use crate::executor::ExecutionEngine;
use crate::result::RunResult;

/// Result of a publish: the run plus the publish record, if one was written.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// `None` when the run was cancelled and nothing was recorded.
    pub record: Option<PublishRecord>,
    pub result: RunResult,
}

/// Save and publish/run entry points over a store and an engine.
pub struct WorkflowService {
    store: Arc<dyn GraphStore>,
    engine: Arc<ExecutionEngine>,
    publish: PublishConfig,
}

fn fatal_summary(violations: &[Violation]) -> String {
    violations
        .iter()
        .filter(|v| v.is_fatal())
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WorkflowService {
    pub fn new(store: Arc<dyn GraphStore>, engine: Arc<ExecutionEngine>, publish: PublishConfig) -> Self {
        Self {
            store,
            engine,
            publish,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Persist without executing. Saving is allowed while the graph still has
    /// violations.
    pub async fn save(
        &self,
        id: &GraphId,
        title: &str,
        graph: &Graph,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let violations = validate_graph(graph);
        if has_fatal(&violations) {
            warn!(graph_id = %id, problems = %fatal_summary(&violations), "Saving graph with violations");
        }
        let version = self.store.save(id, title, graph, expected_version).await?;
        info!(graph_id = %id, version, "Graph saved");
        Ok(version)
    }

    pub async fn load(&self, id: &GraphId) -> Result<StoredGraph> {
        self.store.load(id).await
    }

    pub async fn list(&self) -> Result<Vec<GraphSummary>> {
        self.store.list().await
    }

    pub async fn delete(&self, id: &GraphId) -> Result<bool> {
        self.store.delete(id).await
    }

    /// Structural violations of a stored graph.
    pub async fn validate(&self, id: &GraphId) -> Result<Vec<Violation>> {
        let stored = self.store.load(id).await?;
        Ok(validate_graph(&stored.graph))
    }

    /// Validate and execute the stored graph named by `ctx.graph_id`.
    /// Publish state is left alone.
    pub async fn run(&self, ctx: RunContext) -> Result<RunResult> {
        let stored = self.store.load(&ctx.graph_id).await?;
        self.run_graph(stored.graph, ctx).await
    }

    /// Validate and execute an unsaved graph.
    pub async fn run_graph(&self, graph: Graph, ctx: RunContext) -> Result<RunResult> {
        let violations = validate_graph(&graph);
        if has_fatal(&violations) {
            return Err(AgentflowError::InvalidGraph(fatal_summary(&violations)));
        }
        self.engine.execute(Arc::new(graph), ctx).await
    }

    /// Publish the stored graph: gate, execute, record.
    ///
    /// Fails with `AlreadyPublished` if the stored snapshot was already
    /// published and has not changed since, and with `PublishRejected` on any
    /// fatal violation. Both checks happen before planning. The publish is
    /// recorded unless the run was cancelled.
    pub async fn publish(&self, ctx: RunContext) -> Result<PublishOutcome> {
        let id = ctx.graph_id.clone();
        let stored = self.store.load(&id).await?;
        if stored.publish.published {
            return Err(AgentflowError::AlreadyPublished(id.to_string()));
        }

        let violations = validate_for_publish(&stored.graph, &self.publish);
        if has_fatal(&violations) {
            let reason = fatal_summary(&violations);
            warn!(graph_id = %id, reason = %reason, "Publish rejected");
            return Err(AgentflowError::PublishRejected(reason));
        }

        let result = self.engine.execute(Arc::new(stored.graph), ctx).await?;
        let record = if result.status == RunStatus::Cancelled {
            None
        } else {
            Some(self.store.mark_published(&id, stored.version).await?)
        };

        info!(
            graph_id = %id,
            version = stored.version,
            status = %result.status,
            recorded = record.is_some(),
            "Graph published"
        );
        Ok(PublishOutcome { record, result })
    }
}
