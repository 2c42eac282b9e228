//! Core types for flow definitions
//!
//! A flow is a directed acyclic graph of typed nodes. These types carry
//! the serialized shape of a flow (nodes, edges, per-node config) plus
//! the records the engine produces while running one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a node
pub type NodeId = String;

/// A single node in a flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    /// Unique identifier within the flow
    pub id: NodeId,
    /// Node type tag, e.g. "slider" or "moving-average"
    #[serde(rename = "type")]
    pub node_type: String,
    /// Free-form per-node configuration
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: HashMap::new(),
        }
    }

    /// Builder-style config entry
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A directed edge between two nodes (data flows source -> target)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub source: NodeId,
    pub target: NodeId,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A complete flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

impl FlowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: FlowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(FlowEdge::new(source, target));
        self
    }

    /// Find a node by id
    pub fn find_node(&self, node_id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// A stored node result with bookkeeping metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// The stored output (an object for map-shaped results)
    pub result: Value,
    /// When the result was stored
    pub timestamp: DateTime<Utc>,
    /// Execution this result belongs to
    pub execution_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flow_definition_roundtrip() {
        let flow = FlowDefinition::new("flow-1", "test flow")
            .with_node(FlowNode::new("a", "slider").with_config("value", json!(42.0)))
            .with_node(FlowNode::new("b", "display"))
            .with_edge("a", "b");

        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["nodes"][0]["type"], "slider");
        assert_eq!(json["edges"][0]["source"], "a");

        let back: FlowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back.nodes.len(), 2);
        assert_eq!(back.find_node("a").unwrap().node_type, "slider");
        assert!(back.find_node("missing").is_none());
    }

    #[test]
    fn config_defaults_to_empty() {
        let node: FlowNode =
            serde_json::from_value(json!({"id": "x", "type": "button"})).unwrap();
        assert!(node.config.is_empty());
    }
}
