use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use agentflow_core::{GraphId, RunEvent, RunId};

/// JSONL run logger.
///
/// Consumes run events and appends one JSON object per line to
/// `{log_dir}/{graph_id}/{timestamp}_{run_id}.jsonl`. Lines already written
/// survive a crash mid-run.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

/// Verbosity at which an event starts being written.
fn level_of(event: &RunEvent) -> u8 {
    match event {
        RunEvent::RunStarted { .. } | RunEvent::RunCompleted { .. } => 1,
        RunEvent::StageStarted { .. }
        | RunEvent::NodeFinished { .. }
        | RunEvent::NodeSkipped { .. } => 2,
        RunEvent::NodeStarted { .. } | RunEvent::NodeRetrying { .. } => 3,
    }
}

impl RunLogger {
    /// `level`: 1 = run summary, 2 = per-node outcome, 3 = every attempt.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Write events of `run_id` until the run completes, the bus closes or
    /// `cancel` fires. Returns the log file path when one was opened.
    ///
    /// Takes a receiver rather than the bus so the caller can subscribe
    /// before the run starts and no early event is lost.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<RunEvent>,
        run_id: RunId,
        graph_id: GraphId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let graph_dir = self.log_dir.join(graph_id.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&graph_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = graph_dir.join(format!("{}_{}.jsonl", timestamp, run_id));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            // Buffered events are drained before cancellation is honoured.
            let event = tokio::select! {
                biased;
                result = rx.recv() => match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "RunLogger lagged, skipped events");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        debug!("EventBus closed, RunLogger stopping");
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            };

            if event.run_id() != &run_id {
                continue;
            }
            if let Some(entry) = self.entry(&event) {
                if let Ok(json) = serde_json::to_string(&entry) {
                    let line = format!("{}\n", json);
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        error!(error = %e, "Failed to write log entry");
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        error!(error = %e, "Failed to flush log");
                    }
                }
            }
            if matches!(event, RunEvent::RunCompleted { .. }) {
                break;
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    /// Convert an event into a log line, or `None` if filtered by level.
    fn entry(&self, event: &RunEvent) -> Option<LogEntry> {
        if level_of(event) > self.level {
            return None;
        }
        let mut fields = match serde_json::to_value(event) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return None,
        };
        let event_type = fields.remove("type")?.as_str()?.to_string();
        let run_id = fields
            .remove("run_id")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let node_id = fields
            .remove("node_id")
            .and_then(|v| v.as_str().map(str::to_string));

        Some(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id,
            event_type,
            node_id,
            detail: (!fields.is_empty()).then(|| serde_json::Value::Object(fields)),
        })
    }
}
