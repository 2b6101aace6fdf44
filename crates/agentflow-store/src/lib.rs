//! Graph persistence.
//!
//! A `GraphStore` keeps one snapshot per graph id together with a version
//! counter for optimistic concurrency and the publish record.

pub mod memory;
pub mod record;
pub mod sqlite;

use futures::future::BoxFuture;

use agentflow_core::{GraphId, Result};
use agentflow_graph::Graph;

pub use memory::MemoryGraphStore;
pub use record::{GraphSummary, PublishRecord, StoredGraph};
pub use sqlite::SqliteGraphStore;

/// Durable storage for workflow graphs.
pub trait GraphStore: Send + Sync + 'static {
    /// Load a graph, or `GraphNotFound`.
    fn load(&self, id: &GraphId) -> BoxFuture<'_, Result<StoredGraph>>;

    /// Persist a snapshot and return its version.
    ///
    /// `expected_version` of `Some(v)` fails with `Conflict` unless the stored
    /// version is `v` (`0` means "must not exist yet"); `None` writes
    /// unconditionally. Saving an identical snapshot is a no-op that returns the
    /// current version. Saving a changed one bumps the version and clears the
    /// `published` flag.
    fn save(
        &self,
        id: &GraphId,
        title: &str,
        graph: &Graph,
        expected_version: Option<u64>,
    ) -> BoxFuture<'_, Result<u64>>;

    /// All stored graphs, most recently updated first.
    fn list(&self) -> BoxFuture<'_, Result<Vec<GraphSummary>>>;

    /// Delete a graph. Returns whether it existed.
    fn delete(&self, id: &GraphId) -> BoxFuture<'_, Result<bool>>;

    /// Record a successful publish of `version`.
    ///
    /// Fails with `Conflict` if the graph changed since that version was read.
    fn mark_published(&self, id: &GraphId, version: u64) -> BoxFuture<'_, Result<PublishRecord>>;
}
