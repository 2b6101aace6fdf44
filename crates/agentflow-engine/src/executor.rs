use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use agentflow_core::config::EngineConfig;
use agentflow_core::{EventBus, NodeConfig, NodeId, NodeInputs, NodeStatus, Payload, Result, RunEvent};
use agentflow_graph::{plan, ExecutionPlan, Graph, NodeKind};
use agentflow_handlers::HandlerRegistry;

use crate::context::RunContext;
use crate::result::{run_status, FailureKind, NodeError, NodeRun, RunResult};
use crate::retry::{timeout_for, RetryPolicy};

/// Runs workflow graphs stage by stage.
///
/// Within a stage every node is spawned onto a `JoinSet` and gated by a
/// shared `Semaphore` worker pool. The next stage starts only once every node
/// of the current one is terminal.
pub struct ExecutionEngine {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    retry: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<HandlerRegistry>, config: EngineConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            registry,
            config,
            event_bus: None,
        }
    }

    /// Broadcast run events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Execute `graph` to completion (or cancellation).
    ///
    /// Only planning can fail; node failures are reported in the result.
    pub async fn execute(&self, graph: Arc<Graph>, ctx: RunContext) -> Result<RunResult> {
        let plan = plan(&graph)?;
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut nodes: BTreeMap<NodeId, NodeRun> = BTreeMap::new();
        for id in plan.stages().iter().flatten() {
            if let Some(node) = graph.node(id) {
                nodes.insert(id.clone(), NodeRun::pending(id.clone(), node.kind));
            }
        }

        info!(
            run_id = %ctx.run_id,
            graph_id = %ctx.graph_id,
            stages = plan.len(),
            nodes = nodes.len(),
            "Run started"
        );
        self.publish(RunEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            graph_id: ctx.graph_id.clone(),
            stages: plan.len(),
            nodes: nodes.len(),
        });

        let workers = Arc::new(Semaphore::new(self.config.worker_count().max(1)));
        let mut interrupted = false;

        for (index, stage) in plan.stages().iter().enumerate() {
            if ctx.is_cancelled() {
                interrupted = true;
                break;
            }
            self.publish(RunEvent::StageStarted {
                run_id: ctx.run_id.clone(),
                index,
                nodes: stage.clone(),
            });
            interrupted |= self
                .run_stage(&graph, &plan, stage, &mut nodes, &workers, &ctx)
                .await;
        }

        // Stages never reached
        for run in nodes.values_mut().filter(|n| n.status == NodeStatus::Pending) {
            interrupted = true;
            run.skip(Some(NodeError::new(
                FailureKind::Cancelled,
                "run cancelled before node started",
            )));
            self.publish(RunEvent::NodeSkipped {
                run_id: ctx.run_id.clone(),
                node_id: run.node_id.clone(),
                reason: "run cancelled".to_string(),
            });
        }

        let status = run_status(&nodes, &graph, interrupted);
        let elapsed_ms = clock.elapsed().as_millis() as u64;
        info!(run_id = %ctx.run_id, status = %status, elapsed_ms, "Run completed");
        self.publish(RunEvent::RunCompleted {
            run_id: ctx.run_id.clone(),
            status,
            elapsed_ms,
        });

        Ok(RunResult {
            run_id: ctx.run_id,
            graph_id: ctx.graph_id,
            status,
            stages: plan.stages().to_vec(),
            nodes,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms,
        })
    }

    /// Run one stage. Returns true if cancellation discarded any work.
    async fn run_stage(
        &self,
        graph: &Graph,
        plan: &ExecutionPlan,
        stage: &[NodeId],
        nodes: &mut BTreeMap<NodeId, NodeRun>,
        workers: &Arc<Semaphore>,
        ctx: &RunContext,
    ) -> bool {
        let mut join_set = JoinSet::new();
        let mut spawned = Vec::new();

        for id in stage {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let preds = plan.predecessors(id);

            let blocker = preds.iter().find_map(|p| {
                nodes
                    .get(p)
                    .map(|n| n.status)
                    .filter(|s| matches!(s, NodeStatus::Failed | NodeStatus::Skipped))
                    .map(|s| (p, s))
            });
            if let Some((pred, pred_status)) = blocker {
                if !node.kind.spec().continue_on_error {
                    let reason = format!("predecessor {} {}", pred, pred_status);
                    debug!(node_id = %id, reason = %reason, "Skipping node");
                    if let Some(run) = nodes.get_mut(id) {
                        run.skip(Some(NodeError::new(FailureKind::Upstream, reason.clone())));
                    }
                    self.publish(RunEvent::NodeSkipped {
                        run_id: ctx.run_id.clone(),
                        node_id: id.clone(),
                        reason,
                    });
                    continue;
                }
            }

            // Failed and skipped predecessors contribute nothing.
            let inputs: NodeInputs = preds
                .iter()
                .filter_map(|p| {
                    let run = nodes.get(p).filter(|n| n.status == NodeStatus::Succeeded)?;
                    Some((p.clone(), run.output.clone()?))
                })
                .collect();

            if let Some(run) = nodes.get_mut(id) {
                run.status = NodeStatus::Running;
            }

            let handler = self.registry.get(node.kind);
            let task = NodeTask {
                registry: self.registry.clone(),
                events: self.event_bus.clone(),
                workers: workers.clone(),
                ctx: ctx.clone(),
                node_id: id.clone(),
                kind: node.kind,
                config: node.config.clone(),
                inputs,
                budget: self.retry.budget(node.kind, handler.as_deref()),
                timeout: timeout_for(&self.config, node.kind),
                retry: self.retry.clone(),
            };
            spawned.push(id.clone());
            join_set.spawn(task.run());
        }

        let mut discarded = false;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => discarded |= self.record(nodes, outcome, ctx),
                Err(e) => error!(error = %e, "Node task did not complete"),
            }
        }

        // A spawned node with no recorded outcome panicked.
        for id in spawned {
            let Some(run) = nodes.get_mut(&id) else {
                continue;
            };
            if run.status != NodeStatus::Running {
                continue;
            }
            if ctx.is_cancelled() {
                discarded = true;
                run.skip(Some(NodeError::new(FailureKind::Cancelled, "run cancelled")));
            } else {
                run.status = NodeStatus::Failed;
                run.error = Some(NodeError::new(FailureKind::Permanent, "handler panicked"));
                run.finished_at = Some(Utc::now());
                self.publish(RunEvent::NodeFinished {
                    run_id: ctx.run_id.clone(),
                    node_id: id.clone(),
                    status: NodeStatus::Failed,
                    attempts: run.attempts,
                    elapsed_ms: 0,
                });
            }
        }

        discarded
    }

    /// Store a finished node. Returns true if the result was discarded because
    /// the run was cancelled meanwhile.
    fn record(&self, nodes: &mut BTreeMap<NodeId, NodeRun>, outcome: NodeOutcome, ctx: &RunContext) -> bool {
        let Some(run) = nodes.get_mut(&outcome.node_id) else {
            return false;
        };
        run.attempts = outcome.attempts;
        run.started_at = outcome.started_at;
        run.finished_at = Some(outcome.finished_at);
        run.elapsed_ms = outcome.elapsed_ms;

        if ctx.is_cancelled() {
            run.skip(Some(NodeError::new(
                FailureKind::Cancelled,
                "result discarded: run cancelled",
            )));
            self.publish(RunEvent::NodeSkipped {
                run_id: ctx.run_id.clone(),
                node_id: outcome.node_id,
                reason: "run cancelled".to_string(),
            });
            return true;
        }

        match outcome.result {
            Ok(output) => {
                run.status = NodeStatus::Succeeded;
                run.output = Some(output);
                debug!(node_id = %run.node_id, attempts = run.attempts, "Node succeeded");
            }
            Err(e) => {
                run.status = NodeStatus::Failed;
                error!(
                    node_id = %run.node_id,
                    kind = %run.kind,
                    attempts = run.attempts,
                    error = %e,
                    "Node failed"
                );
                run.error = Some(e);
            }
        }
        self.publish(RunEvent::NodeFinished {
            run_id: ctx.run_id.clone(),
            node_id: run.node_id.clone(),
            status: run.status,
            attempts: run.attempts,
            elapsed_ms: run.elapsed_ms,
        });
        false
    }
}

/// What a node task hands back to the stage collector.
struct NodeOutcome {
    node_id: NodeId,
    result: std::result::Result<Payload, NodeError>,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: DateTime<Utc>,
    elapsed_ms: u64,
}

/// Bundled parameters for a single node execution task.
struct NodeTask {
    registry: Arc<HandlerRegistry>,
    events: Option<Arc<EventBus>>,
    workers: Arc<Semaphore>,
    ctx: RunContext,
    node_id: NodeId,
    kind: NodeKind,
    config: NodeConfig,
    inputs: NodeInputs,
    budget: u32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl NodeTask {
    /// Acquire a worker, then attempt the handler until it succeeds, fails
    /// permanently, or the retry budget is spent.
    async fn run(self) -> NodeOutcome {
        let mut attempts = 0;
        let mut started_at = None;
        let clock = Instant::now();

        let result = match self.workers.acquire().await {
            Err(_) => Err(NodeError::new(FailureKind::Permanent, "worker pool closed")),
            Ok(_permit) if self.ctx.is_cancelled() => {
                Err(NodeError::new(FailureKind::Cancelled, "run cancelled"))
            }
            Ok(_permit) => {
                started_at = Some(Utc::now());
                self.attempt_loop(&mut attempts).await
            }
        };

        NodeOutcome {
            node_id: self.node_id,
            result,
            attempts,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: clock.elapsed().as_millis() as u64,
        }
    }

    async fn attempt_loop(&self, attempts: &mut u32) -> std::result::Result<Payload, NodeError> {
        loop {
            *attempts += 1;
            let attempt = *attempts;
            self.publish(RunEvent::NodeStarted {
                run_id: self.ctx.run_id.clone(),
                node_id: self.node_id.clone(),
                attempt,
            });

            let outcome = self
                .registry
                .invoke(
                    self.kind,
                    self.ctx.handler_context(&self.node_id, attempt),
                    self.config.clone(),
                    self.inputs.clone(),
                    self.timeout,
                )
                .await;

            let err = match outcome {
                Ok(output) => return Ok(output),
                Err(failure) => NodeError::from(failure),
            };
            if !err.kind.is_retryable() || attempt > self.budget {
                return Err(err);
            }

            let backoff = self.retry.backoff(attempt - 1);
            warn!(
                node_id = %self.node_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Node attempt failed, retrying"
            );
            self.publish(RunEvent::NodeRetrying {
                run_id: self.ctx.run_id.clone(),
                node_id: self.node_id.clone(),
                attempt,
                backoff_ms: backoff.as_millis() as u64,
                error: err.message.clone(),
            });

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.ctx.cancel.cancelled() => return Err(err),
            }
        }
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
