//! Error types for the flow engine

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias using FlowEngineError
pub type Result<T> = std::result::Result<T, FlowEngineError>;

/// Errors that can occur in the flow engine
#[derive(Debug, Error)]
pub enum FlowEngineError {
    /// The flow graph contains a cycle
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<NodeId>),

    /// The flow definition is structurally invalid
    #[error("Invalid flow definition: {0}")]
    InvalidDefinition(String),

    /// A node's configuration failed validation
    #[error("Invalid configuration for node '{node_id}': {message}")]
    InvalidConfig { node_id: NodeId, message: String },

    /// No factory registered for a node type
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Node execution failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// Error from an external collaborator (run store, broadcast, device gateway)
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowEngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a config validation error for a node
    pub fn invalid_config(node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            node_id: node_id.into(),
            message: msg.into(),
        }
    }

    /// Create a gateway error with a message
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }
}
