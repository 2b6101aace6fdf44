use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use agentflow_core::{AgentflowError, GraphId, Result};
use agentflow_graph::Graph;

use crate::record::{check_version, GraphSummary, PublishRecord, StoredGraph};
use crate::GraphStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS graphs (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        version INTEGER NOT NULL,
        published INTEGER NOT NULL DEFAULT 0,
        last_published TEXT,
        publish_count INTEGER NOT NULL DEFAULT 0,
        node_count INTEGER NOT NULL DEFAULT 0,
        edge_count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_graphs_updated ON graphs(updated_at);";

/// SQLite-backed graph store. Graph bodies are stored as JSON.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> AgentflowError {
    AgentflowError::Database(e.to_string())
}

impl SqliteGraphStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // WAL lets readers proceed while a save is in progress
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Graph store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }
}

type Row = (String, String, i64, bool, Option<String>, i64, String);

fn load_row(conn: &Connection, id: &GraphId) -> Result<Option<Row>> {
    conn.query_row(
        "SELECT title, body, version, published, last_published, publish_count, updated_at
         FROM graphs WHERE id = ?1",
        params![id.as_str()],
        |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        },
    )
    .optional()
    .map_err(db_err)
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl GraphStore for SqliteGraphStore {
    fn load(&self, id: &GraphId) -> BoxFuture<'_, Result<StoredGraph>> {
        let id = id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let (title, body, version, published, last_published, publish_count, updated_at) =
                load_row(&conn, &id)?.ok_or_else(|| AgentflowError::GraphNotFound(id.to_string()))?;

            Ok(StoredGraph {
                graph: serde_json::from_str(&body)?,
                id,
                title,
                version: version as u64,
                publish: PublishRecord {
                    published,
                    last_published: last_published.as_deref().map(parse_time),
                    publish_count: publish_count as u32,
                },
                updated_at: parse_time(&updated_at),
            })
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
        let body = serde_json::to_string(graph);
        let (nodes, edges) = (graph.nodes.len() as i64, graph.edges.len() as i64);

        Box::pin(async move {
            let body = body?;
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;

            let current = load_row(&tx, &id)?;
            let current_version = current.as_ref().map_or(0, |row| row.2 as u64);
            check_version(&id, current_version, expected_version)?;

            if let Some((old_title, old_body, ..)) = &current {
                if *old_title == title && *old_body == body {
                    return Ok(current_version);
                }
            }

            let version = current_version + 1;
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO graphs (id, title, body, version, published, node_count, edge_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    body = excluded.body,
                    version = excluded.version,
                    published = 0,
                    node_count = excluded.node_count,
                    edge_count = excluded.edge_count,
                    updated_at = excluded.updated_at",
                params![id.as_str(), title, body, version as i64, nodes, edges, now],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            debug!(graph_id = %id, version, "Graph saved");
            Ok(version)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<GraphSummary>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, version, node_count, edge_count, published, updated_at
                     FROM graphs
                     ORDER BY updated_at DESC, id ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let version: i64 = row.get(2)?;
                    let nodes: i64 = row.get(3)?;
                    let edges: i64 = row.get(4)?;
                    let updated_at: String = row.get(6)?;
                    Ok(GraphSummary {
                        id: GraphId::from(id),
                        title: row.get(1)?,
                        version: version as u64,
                        nodes: nodes as usize,
                        edges: edges as usize,
                        published: row.get(5)?,
                        updated_at: parse_time(&updated_at),
                    })
                })
                .map_err(db_err)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)?);
            }
            Ok(out)
        })
    }

    fn delete(&self, id: &GraphId) -> BoxFuture<'_, Result<bool>> {
        let id = id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let n = conn
                .execute("DELETE FROM graphs WHERE id = ?1", params![id.as_str()])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }

    fn mark_published(&self, id: &GraphId, version: u64) -> BoxFuture<'_, Result<PublishRecord>> {
        let id = id.clone();
        Box::pin(async move {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;

            let (_, _, current, published, last_published, publish_count, _) =
                load_row(&tx, &id)?.ok_or_else(|| AgentflowError::GraphNotFound(id.to_string()))?;
            check_version(&id, current as u64, Some(version))?;

            let mut record = PublishRecord {
                published,
                last_published: last_published.as_deref().map(parse_time),
                publish_count: publish_count as u32,
            };
            record.stamp(Utc::now());

            tx.execute(
                "UPDATE graphs SET published = 1, last_published = ?2, publish_count = ?3 WHERE id = ?1",
                params![
                    id.as_str(),
                    record.last_published.map(|t| t.to_rfc3339()),
                    record.publish_count as i64
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            debug!(graph_id = %id, version, count = record.publish_count, "Graph published");
            Ok(record)
        })
    }
}
