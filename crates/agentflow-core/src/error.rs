use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentflowError {
    // Graph errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Cycle detected at node {0}")]
    CycleDetected(String),

    // Publish errors
    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    #[error("Graph {0} is unchanged and already published")]
    AlreadyPublished(String),

    // Execution errors
    #[error("No handler registered for node kind: {0}")]
    HandlerNotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Version conflict on graph {graph_id}: expected {expected}, found {actual}")]
    Conflict {
        graph_id: String,
        expected: u64,
        actual: u64,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentflowError>;

/// Failure raised by a node handler, classified for the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum HandlerError {
    /// Retryable, e.g. a network timeout or a 5xx response.
    #[error("transient: {0}")]
    Transient(String),
    /// Not retried, e.g. malformed config.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Unclassified failures are treated as permanent.
impl From<AgentflowError> for HandlerError {
    fn from(e: AgentflowError) -> Self {
        Self::Permanent(e.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Permanent(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_is_permanent() {
        let err: HandlerError = AgentflowError::Config("bad".into()).into();
        assert!(!err.is_transient());
        assert_eq!(err.message(), "Config error: bad");
    }

    #[test]
    fn test_handler_error_serialization() {
        let err = HandlerError::transient("timeout");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "transient", "message": "timeout"}));
    }
}
