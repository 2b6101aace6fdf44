//! Workflow graph model: node kinds, editing, validation and planning.
//!
//! A workflow is a directed acyclic graph of typed `Node`s connected by
//! `Edge`s. `WorkflowGraph` is the editing session: every mutation goes through
//! the validator and a rejected mutation leaves the graph untouched.
//! `scheduler::plan` turns a snapshot into ordered stages of independent nodes
//! for the execution engine.

pub mod edge;
pub mod kind;
pub mod model;
pub mod node;
pub mod scheduler;
pub mod validator;

pub use edge::Edge;
pub use kind::{Category, ConfigField, Family, KindSpec, MaxIncoming, NodeKind};
pub use model::{Graph, WorkflowGraph};
pub use node::{Node, Position};
pub use scheduler::{plan, CycleDetected, ExecutionPlan};
pub use validator::{
    can_connect, check_edge, has_fatal, validate_for_publish, validate_graph, EdgeRejected,
    Severity, Violation, ViolationCode,
};
