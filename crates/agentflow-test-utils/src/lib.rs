//! Shared test utilities for agentflow crates.
//!
//! Mock handlers with scripted results, call counters and input recording,
//! plus small graph fixtures.

pub mod fixtures;
pub mod handlers;

pub use fixtures::{chain, fan_in_graph, graph};
pub use handlers::{CallCounter, RecordedCall, RecordingHandler, ScriptedHandler};
