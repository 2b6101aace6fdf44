use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agentflow_core::config::{EngineConfig, HandlersConfig, PublishConfig};
use agentflow_core::{AgentflowError, GraphId, NodeId, NodeStatus, RunStatus};
use agentflow_engine::{ExecutionEngine, FailureKind, RunContext, WorkflowService};
use agentflow_graph::{validate_graph, EdgeRejected, Graph, Node, NodeKind, Severity, WorkflowGraph};
use agentflow_handlers::HandlerRegistry;
use agentflow_store::{GraphStore, SqliteGraphStore};
use agentflow_test_utils::{RecordingHandler, ScriptedHandler};

/// Trigger -> File Upload -> Qdrant <- URL Scraper, then Qdrant -> GPT-4o -> Slack.
fn ingest_pipeline() -> Graph {
    let mut g = WorkflowGraph::new();
    for node in [
        Node::new("t", NodeKind::Trigger),
        Node::new("file", NodeKind::FileUpload).with("url", json!("s3://bucket/doc.pdf")),
        Node::new("page", NodeKind::UrlScraper).with("urlSearch", json!("https://example.com")),
        Node::new("vectors", NodeKind::Qdrant),
        Node::new("llm", NodeKind::Gpt4o).with("prompt", json!("Summarize")),
        Node::new("notify", NodeKind::Slack),
    ] {
        g.insert_node(node).unwrap();
    }
    for (s, t) in [
        ("t", "file"),
        ("file", "vectors"),
        ("page", "vectors"),
        ("vectors", "llm"),
        ("llm", "notify"),
    ] {
        g.add_edge(&NodeId::from(s), &NodeId::from(t)).unwrap();
    }
    g.snapshot()
}

struct Harness {
    service: WorkflowService,
    vectors: RecordingHandler,
    notify: RecordingHandler,
}

fn harness(store: Arc<dyn GraphStore>) -> Harness {
    let vectors = RecordingHandler::new();
    let notify = RecordingHandler::new();

    let mut registry = HandlerRegistry::with_builtins(&HandlersConfig::default());
    registry.register(NodeKind::FileUpload, ScriptedHandler::always_ok(json!("pdf text")));
    registry.register(NodeKind::UrlScraper, ScriptedHandler::flaky(1, json!("page text")));
    registry.register(NodeKind::Qdrant, vectors.clone());
    registry.register(NodeKind::Gpt4o, ScriptedHandler::always_ok(json!("summary")));
    registry.register(NodeKind::Slack, notify.clone());

    let config = EngineConfig {
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        ..EngineConfig::default()
    };
    let engine = ExecutionEngine::new(Arc::new(registry), config);
    Harness {
        service: WorkflowService::new(store, Arc::new(engine), PublishConfig::default()),
        vectors,
        notify,
    }
}

#[tokio::test]
async fn test_ingest_pipeline_publish_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graphs.db");
    let h = harness(Arc::new(SqliteGraphStore::open(&db).unwrap()));
    let id = GraphId::from("ingest");

    let graph = ingest_pipeline();
    // The scraper is a root outside the trigger's reach: a warning, not an error.
    let violations = validate_graph(&graph);
    assert!(violations.iter().all(|v| v.severity == Severity::Warning));

    assert_eq!(h.service.save(&id, "Ingest", &graph, Some(0)).await.unwrap(), 1);
    let outcome = h.service.publish(RunContext::new(id.clone())).await.unwrap();
    let result = &outcome.result;

    assert_eq!(result.status, RunStatus::Succeeded);
    let stage_of = |id: &str| result.stages.iter().position(|s| s.contains(&NodeId::from(id)));
    assert_eq!(stage_of("t"), Some(0));
    assert_eq!(stage_of("page"), Some(0));
    assert_eq!(stage_of("file"), Some(1));
    assert_eq!(stage_of("vectors"), Some(2));
    assert_eq!(stage_of("notify"), Some(4));

    // The flaky scraper needed a retry.
    assert_eq!(result.node("page").unwrap().attempts, 2);

    let calls = h.vectors.calls_for("vectors");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].inputs.get(&NodeId::from("file")), Some(&json!("pdf text")));
    assert_eq!(calls[0].inputs.get(&NodeId::from("page")), Some(&json!("page text")));
    assert_eq!(
        h.notify.calls_for("notify")[0].inputs.get(&NodeId::from("llm")),
        Some(&json!("summary"))
    );

    assert_eq!(outcome.record.unwrap().publish_count, 1);
    let err = h.service.publish(RunContext::new(id.clone())).await.unwrap_err();
    assert!(matches!(err, AgentflowError::AlreadyPublished(_)));

    // Publish state survives a reopen.
    drop(h);
    let store = SqliteGraphStore::open(&db).unwrap();
    let stored = store.load(&id).await.unwrap();
    assert!(stored.publish.published);
    assert_eq!(stored.graph, graph);
}

#[tokio::test]
async fn test_condition_lane_sees_run_input() {
    let h = harness(Arc::new(SqliteGraphStore::in_memory().unwrap()));
    let mut g = WorkflowGraph::new();
    g.insert_node(Node::new("t", NodeKind::Trigger)).unwrap();
    g.insert_node(Node::new("check", NodeKind::Condition).with("expression", json!("priority == high")))
        .unwrap();
    g.insert_node(Node::new("act", NodeKind::Action)).unwrap();
    g.add_edge(&"t".into(), &"check".into()).unwrap();
    g.add_edge(&"check".into(), &"act".into()).unwrap();

    let id = GraphId::from("triage");
    h.service.save(&id, "Triage", &g.snapshot(), None).await.unwrap();

    let ctx = RunContext::new(id.clone()).with_input(json!({"priority": "high"}));
    let result = h.service.run(ctx).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.output_of("check").unwrap()["matched"], true);
    assert_eq!(result.output_of("act").unwrap()["matched"], true);

    let ctx = RunContext::new(id).with_input(json!({"priority": "low"}));
    let result = h.service.run(ctx).await.unwrap();
    assert_eq!(result.output_of("check").unwrap()["matched"], false);
}

#[tokio::test]
async fn test_editing_rejections_leave_graph_unchanged() {
    let mut g = WorkflowGraph::from_graph(ingest_pipeline()).unwrap();
    let before = g.snapshot();

    assert_eq!(
        g.add_node(NodeKind::Trigger, Default::default()),
        Err(EdgeRejected::SecondTrigger)
    );
    assert_eq!(g.add_edge(&"llm".into(), &"llm".into()), Err(EdgeRejected::SelfLoop));
    assert_eq!(
        g.add_edge(&"llm".into(), &"file".into()),
        Err(EdgeRejected::FanOutExceeded)
    );
    assert_eq!(
        g.add_edge(&"notify".into(), &"t".into()),
        Err(EdgeRejected::KindMismatch)
    );
    assert_eq!(g.snapshot(), before);
}

#[tokio::test]
async fn test_stale_save_is_a_conflict() {
    let h = harness(Arc::new(SqliteGraphStore::in_memory().unwrap()));
    let id = GraphId::from("g");
    let v1 = h.service.save(&id, "t", &ingest_pipeline(), None).await.unwrap();

    let mut edited = ingest_pipeline();
    edited.nodes.retain(|n| n.id.as_str() != "notify");
    edited.edges.retain(|e| e.target.as_str() != "notify");
    let v2 = h.service.save(&id, "t", &edited, Some(v1)).await.unwrap();
    assert_eq!(v2, v1 + 1);

    let err = h.service.save(&id, "t", &ingest_pipeline(), Some(v1)).await.unwrap_err();
    assert!(matches!(err, AgentflowError::Conflict { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_publish_discards_in_flight_wait() {
    let h = harness(Arc::new(SqliteGraphStore::in_memory().unwrap()));
    let mut g = WorkflowGraph::new();
    g.insert_node(Node::new("t", NodeKind::Trigger)).unwrap();
    g.insert_node(Node::new("pause", NodeKind::Wait).with("seconds", json!(30)))
        .unwrap();
    g.insert_node(Node::new("notify", NodeKind::Slack)).unwrap();
    g.add_edge(&"t".into(), &"pause".into()).unwrap();
    g.add_edge(&"pause".into(), &"notify".into()).unwrap();

    let id = GraphId::from("slow");
    h.service.save(&id, "Slow", &g.snapshot(), None).await.unwrap();

    let ctx = RunContext::new(id.clone());
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let outcome = h.service.publish(ctx).await.unwrap();
    let result = outcome.result;
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.status_of("t"), Some(NodeStatus::Succeeded));
    for id in ["pause", "notify"] {
        let node = result.node(id).unwrap();
        assert_eq!(node.status, NodeStatus::Skipped);
        assert_eq!(node.error.as_ref().unwrap().kind, FailureKind::Cancelled);
    }
    assert!(outcome.record.is_none());
    assert!(h.notify.calls().is_empty());
    assert!(!h.service.load(&id).await.unwrap().publish.published);
}
