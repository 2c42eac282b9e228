//! Event types for streaming flow progress
//!
//! Events are sent from the engine to any consumer (websocket bridge,
//! CLI, tests) to report run lifecycle, per-node progress, and level
//! completion.

use serde::{Deserialize, Serialize};

/// Trait for sending flow events
///
/// This abstracts over the transport mechanism (channel, websocket, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: FlowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during flow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowEvent {
    /// Flow execution started
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        flow_id: String,
        execution_id: String,
    },

    /// Flow execution reached a terminal state successfully
    #[serde(rename_all = "camelCase")]
    ExecutionCompleted {
        flow_id: String,
        execution_id: String,
        status: String,
    },

    /// Flow execution failed
    #[serde(rename_all = "camelCase")]
    ExecutionFailed {
        flow_id: String,
        execution_id: String,
        error: String,
    },

    /// A node started executing
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        node_id: String,
        execution_id: String,
    },

    /// A node completed successfully
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node_id: String,
        execution_id: String,
        output: Option<serde_json::Value>,
    },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        node_id: String,
        execution_id: String,
        error: String,
    },

    /// An execution level finished (all of its nodes settled)
    #[serde(rename_all = "camelCase")]
    LevelCompleted {
        execution_id: String,
        level: usize,
        nodes: Vec<String>,
    },
}

/// No-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: FlowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Event sink that collects events into a vector (for testing)
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<FlowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get a copy of all collected events
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: FlowEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map(|mut events| events.push(event))
            .map_err(|_| EventError {
                message: "Lock poisoned".to_string(),
            })
    }
}
