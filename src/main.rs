use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentflow_core::config::AppConfig;
use agentflow_core::{EventBus, GraphId, NodeStatus, RunEvent, RunStatus};
use agentflow_engine::{ExecutionEngine, RunContext, RunLogger, RunResult, WorkflowService};
use agentflow_graph::{plan, validate_for_publish, validate_graph, Graph, NodeKind, Violation};
use agentflow_handlers::HandlerRegistry;
use agentflow_store::SqliteGraphStore;

#[derive(Parser)]
#[command(name = "agentflow", version, about = "Workflow graph validator and execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a graph document
    Validate {
        /// Graph JSON file
        file: PathBuf,
        /// Also apply the publish gates
        #[arg(long)]
        publish: bool,
    },
    /// Print the staged execution plan of a graph document
    Plan {
        file: PathBuf,
    },
    /// Execute a graph document, or a stored graph with --id
    Run {
        /// Graph JSON file
        #[arg(required_unless_present = "id", conflicts_with = "id")]
        file: Option<PathBuf>,
        /// Stored graph id
        #[arg(long)]
        id: Option<String>,
        /// Run input as JSON
        #[arg(long)]
        input: Option<String>,
        /// Caller identity token forwarded to handlers
        #[arg(long, env = "AGENTFLOW_IDENTITY")]
        identity: Option<String>,
    },
    /// Persist a graph document without running it
    Save {
        file: PathBuf,
        /// Graph id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Fail unless the stored version matches (0 = must not exist)
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Validate, execute and record a publish of a stored graph
    Publish {
        id: String,
        #[arg(long)]
        input: Option<String>,
        #[arg(long, env = "AGENTFLOW_IDENTITY")]
        identity: Option<String>,
    },
    /// List stored graphs
    List,
    /// Print a stored graph
    Show {
        id: String,
    },
    /// Delete a stored graph
    Delete {
        id: String,
    },
    /// List node kinds and their connection rules
    Kinds,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agentflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that need neither config nor store
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "agentflow", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Kinds => {
            print_kinds();
            return Ok(());
        }
        Commands::Plan { file } => {
            let graph = read_graph(file)?;
            let plan = plan(&graph)?;
            for (i, stage) in plan.stages().iter().enumerate() {
                let ids: Vec<&str> = stage.iter().map(|id| id.as_str()).collect();
                println!("stage {}: {}", i + 1, ids.join(", "));
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli.config)?;

    if let Commands::Validate { file, publish } = &cli.command {
        let graph = read_graph(file)?;
        let violations = if *publish {
            validate_for_publish(&graph, &config.publish)
        } else {
            validate_graph(&graph)
        };
        return report(&violations);
    }

    let event_bus = Arc::new(EventBus::default());
    let store = Arc::new(SqliteGraphStore::open(&config.store_path())?);
    let registry = Arc::new(HandlerRegistry::with_builtins(&config.handlers));
    let engine = ExecutionEngine::new(registry, config.engine.clone()).with_event_bus(event_bus.clone());
    let service = WorkflowService::new(store, Arc::new(engine), config.publish.clone());

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling run...");
        cancel_clone.cancel();
    });

    match cli.command {
        Commands::Run {
            file,
            id,
            input,
            identity,
        } => {
            let (graph_id, graph) = match (id, file) {
                (Some(id), _) => (GraphId::from(id), None),
                (None, Some(file)) => (graph_id_for(&file), Some(read_graph(&file)?)),
                (None, None) => anyhow::bail!("either a graph file or --id is required"),
            };
            let ctx = run_context(graph_id, input, identity, &cancel)?;
            let watchers = watch_run(&config, &event_bus, &ctx);
            let result = match graph {
                Some(graph) => service.run_graph(graph, ctx).await,
                None => service.run(ctx).await,
            };
            watchers.finish().await;
            print_result(&result?)?;
        }
        Commands::Publish {
            id,
            input,
            identity,
        } => {
            let ctx = run_context(GraphId::from(id), input, identity, &cancel)?;
            let watchers = watch_run(&config, &event_bus, &ctx);
            let outcome = service.publish(ctx).await;
            watchers.finish().await;
            let outcome = outcome?;
            match &outcome.record {
                Some(record) => eprintln!(
                    "published (count {}, at {})",
                    record.publish_count,
                    record
                        .last_published
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                ),
                None => eprintln!("run cancelled, publish not recorded"),
            }
            print_result(&outcome.result)?;
        }
        Commands::Save {
            file,
            id,
            title,
            expected_version,
        } => {
            let graph = read_graph(&file)?;
            let id = id.map(GraphId::from).unwrap_or_else(|| graph_id_for(&file));
            let title = title.unwrap_or_else(|| id.to_string());
            let violations = validate_graph(&graph);
            for v in &violations {
                eprintln!("{}", v);
            }
            let version = service.save(&id, &title, &graph, expected_version).await?;
            println!("{} saved at version {}", id, version);
        }
        Commands::List => {
            let graphs = service.list().await?;
            if graphs.is_empty() {
                println!("No graphs stored.");
            }
            for g in graphs {
                println!(
                    "{:<24} v{:<4} {:>3} nodes {:>3} edges {} {}  {}",
                    g.id,
                    g.version,
                    g.nodes,
                    g.edges,
                    if g.published { "published  " } else { "unpublished" },
                    g.updated_at.format("%Y-%m-%d %H:%M"),
                    g.title,
                );
            }
        }
        Commands::Show { id } => {
            let stored = service.load(&GraphId::from(id)).await?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Commands::Delete { id } => {
            let id = GraphId::from(id);
            if service.delete(&id).await? {
                println!("Deleted {}", id);
            } else {
                warn!(graph_id = %id, "No such graph");
            }
        }
        Commands::Validate { .. } | Commands::Plan { .. } | Commands::Kinds | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Load the config file, then `~/.agentflow/config.toml`, then defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        let home_config = home.join(".agentflow").join("config.toml");
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }
    warn!(path = %path.display(), "No config file found, using defaults");
    Ok(AppConfig::default())
}

fn read_graph(path: &Path) -> anyhow::Result<Graph> {
    let content = std::fs::read_to_string(path)?;
    Ok(Graph::from_json(&content)?)
}

fn graph_id_for(path: &Path) -> GraphId {
    path.file_stem()
        .map(|s| GraphId::from(s.to_string_lossy().to_string()))
        .unwrap_or_default()
}

fn run_context(
    graph_id: GraphId,
    input: Option<String>,
    identity: Option<String>,
    cancel: &CancellationToken,
) -> anyhow::Result<RunContext> {
    let mut ctx = RunContext::new(graph_id).with_cancel(cancel.child_token());
    if let Some(input) = input {
        ctx = ctx.with_input(serde_json::from_str(&input)?);
    }
    if let Some(identity) = identity {
        ctx = ctx.with_identity(identity);
    }
    Ok(ctx)
}

/// Background tasks that follow one run: progress printer and JSONL logger.
struct RunWatchers {
    done: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl RunWatchers {
    /// Stop the watchers once they have drained what the run published.
    async fn finish(self) {
        self.done.cancel();
        for handle in self.handles {
            handle.await.ok();
        }
    }
}

fn watch_run(config: &AppConfig, event_bus: &EventBus, ctx: &RunContext) -> RunWatchers {
    let done = CancellationToken::new();
    let mut handles = Vec::new();

    // Subscribe before the run starts so no event is missed.
    let mut rx = event_bus.subscribe();
    let run_id = ctx.run_id.clone();
    let stop = done.clone();
    handles.push(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                result = rx.recv() => match result {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                },
                _ = stop.cancelled() => break,
            };
            if event.run_id() != &run_id {
                continue;
            }
            match event {
                RunEvent::NodeRetrying {
                    node_id,
                    attempt,
                    error,
                    ..
                } => eprintln!("[{}: retry after attempt {}] {}", node_id, attempt, error),
                RunEvent::NodeFinished {
                    node_id,
                    status,
                    elapsed_ms,
                    ..
                } => eprintln!("[{}: {}] {}ms", node_id, status, elapsed_ms),
                RunEvent::NodeSkipped { node_id, reason, .. } => {
                    eprintln!("[{}: skipped] {}", node_id, reason)
                }
                RunEvent::RunCompleted { status, elapsed_ms, .. } => {
                    eprintln!("run {} in {}ms", status, elapsed_ms);
                    break;
                }
                _ => {}
            }
        }
    }));

    if let Some(log_dir) = config.log_dir() {
        let level = config.log.as_ref().map_or(2, |l| l.level);
        let logger = RunLogger::new(log_dir, level);
        let rx = event_bus.subscribe();
        let (run_id, graph_id) = (ctx.run_id.clone(), ctx.graph_id.clone());
        let stop = done.clone();
        handles.push(tokio::spawn(async move {
            if let Some(path) = logger.run(rx, run_id, graph_id, stop).await {
                info!(path = %path.display(), "Run log written");
            }
        }));
    }

    RunWatchers { done, handles }
}

fn print_result(result: &RunResult) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    let failed: Vec<&str> = result
        .nodes
        .values()
        .filter(|n| n.status == NodeStatus::Failed)
        .map(|n| n.node_id.as_str())
        .collect();
    if failed.is_empty() {
        return Ok(());
    }
    if result.status == RunStatus::Failed {
        anyhow::bail!("run failed: failed nodes: {}", failed.join(", "));
    }
    warn!(status = %result.status, nodes = %failed.join(", "), "Failures contained by tolerant nodes");
    Ok(())
}

fn report(violations: &[Violation]) -> anyhow::Result<()> {
    if violations.is_empty() {
        println!("ok");
        return Ok(());
    }
    for v in violations {
        println!("{}", v);
    }
    let fatal = violations.iter().filter(|v| v.is_fatal()).count();
    if fatal > 0 {
        anyhow::bail!("{} fatal violation(s)", fatal);
    }
    Ok(())
}

fn print_kinds() {
    for kind in NodeKind::ALL {
        let spec = kind.spec();
        let mut notes = Vec::new();
        if spec.continue_on_error {
            notes.push("runs after upstream failure".to_string());
        }
        if let Some(n) = spec.max_retries {
            notes.push(format!("max retries {}", n));
        }
        if let Some(secs) = spec.timeout_secs {
            notes.push(format!("timeout {}s", secs));
        }
        println!(
            "{:<16} {:<8} {:<12} {}",
            spec.label,
            format!("{:?}", spec.category),
            format!("{:?}", spec.family),
            spec.description
        );
        if !notes.is_empty() {
            println!("{:<16} {}", "", notes.join(", "));
        }
    }
}
