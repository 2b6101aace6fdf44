use serde::{Deserialize, Serialize};

use agentflow_core::{NodeConfig, NodeId};

use crate::kind::NodeKind;

/// Canvas position. Layout only; irrelevant to execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A step in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node. Immutable once created.
    pub id: NodeId,
    /// Step type.
    pub kind: NodeKind,
    /// Kind-specific configuration.
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default)]
    pub position: Position,
    /// Card title shown in the editor.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Node {
    /// Create a node with the kind's default config, title and description.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        let spec = kind.spec();
        Self {
            id: id.into(),
            kind,
            config: spec.default_config(),
            position: Position::default(),
            title: spec.label.to_string(),
            description: spec.description.to_string(),
        }
    }

    /// Merge config entries over the defaults.
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config.extend(config);
        self
    }

    /// Set a single config entry.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_trigger(&self) -> bool {
        self.kind == NodeKind::Trigger
    }
}
