//! Workflow execution.
//!
//! `ExecutionEngine` runs a planned graph stage by stage: every node of a
//! stage runs concurrently on a bounded worker pool, transient failures are
//! retried with backoff, and a terminal failure only poisons the successors
//! that are not fault tolerant. `WorkflowService` ties the engine to a
//! `GraphStore` for the save / run / publish entry points.

pub mod context;
pub mod executor;
pub mod result;
pub mod retry;
pub mod run_log;
pub mod service;

pub use context::RunContext;
pub use executor::ExecutionEngine;
pub use result::{FailureKind, NodeError, NodeRun, RunResult};
pub use retry::RetryPolicy;
pub use run_log::RunLogger;
pub use service::{PublishOutcome, WorkflowService};
