//! Pass-through nodes: comment and debug. Both forward their input
//! unchanged; debug additionally logs it and appends to the flow-scoped
//! `debug_history` variable.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use flow_engine::{FlowContext, FlowEngineError, FlowNode, Processor, Result};

use crate::props::{now_rfc3339, str_prop};

/// Annotation node; data flows through untouched
pub struct CommentProcessor {
    node_id: String,
    text: String,
    ctx: FlowContext,
}

impl CommentProcessor {
    pub fn from_node(node: &FlowNode, ctx: FlowContext) -> Result<Self> {
        Ok(Self {
            node_id: node.id.clone(),
            text: str_prop(&node.config, "text").unwrap_or_default(),
            ctx,
        })
    }
}

#[async_trait]
impl Processor for CommentProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "comment"
    }

    fn is_io_bound(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        self.ctx
            .set_variable(format!("comment_{}", self.node_id), json!(self.text));
        Ok(input.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebugLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl DebugLevel {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    fn log_level(&self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Logs its input and keeps a flow-wide trace in `debug_history`
pub struct DebugProcessor {
    node_id: String,
    level: DebugLevel,
    message: Option<String>,
    ctx: FlowContext,
}

impl DebugProcessor {
    pub fn from_node(node: &FlowNode, ctx: FlowContext) -> Result<Self> {
        let level = match str_prop(&node.config, "logLevel") {
            Some(tag) => DebugLevel::parse(&tag).ok_or_else(|| {
                FlowEngineError::invalid_config(&node.id, format!("unknown logLevel '{tag}'"))
            })?,
            None => DebugLevel::Info,
        };
        Ok(Self {
            node_id: node.id.clone(),
            level,
            message: str_prop(&node.config, "logMessage"),
            ctx,
        })
    }
}

#[async_trait]
impl Processor for DebugProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "debug"
    }

    fn is_io_bound(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("debug node {}", self.node_id));
        let input_json = json!(input);
        log::log!(self.level.log_level(), "{message}: {input_json}");

        let timestamp = now_rfc3339();
        let record = json!({
            "node_id": self.node_id,
            "timestamp": timestamp,
            "input_data": input_json,
            "message": message,
        });
        let mut history = match self.ctx.variable("debug_history") {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        history.push(record);
        self.ctx.set_variable("debug_history", Value::Array(history));

        let mut output = input.clone();
        output.insert(
            "debug_info".to_string(),
            json!({
                "logged_at_level": self.level.as_str(),
                "message": message,
                "timestamp": timestamp,
            }),
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::ExecutionContext;

    fn input(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn comment_passes_input_through_and_records_text() {
        let engine_ctx = ExecutionContext::new("flow", None);
        let node = FlowNode::new("c1", "comment").with_config("text", json!("sensor leg"));
        let mut processor =
            CommentProcessor::from_node(&node, FlowContext::new(&engine_ctx)).unwrap();

        let data = input(&[("output", json!(3))]);
        let out = processor.execute(&data).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(engine_ctx.variable("comment_c1"), Some(json!("sensor leg")));
    }

    #[tokio::test]
    async fn debug_appends_to_history_and_tags_output() {
        let engine_ctx = ExecutionContext::new("flow", None);
        let node = FlowNode::new("dbg", "debug")
            .with_config("logLevel", json!("warning"))
            .with_config("logMessage", json!("checkpoint"));
        let mut processor =
            DebugProcessor::from_node(&node, FlowContext::new(&engine_ctx)).unwrap();

        let out = processor
            .execute(&input(&[("output", json!(1))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(1), "input forwarded");
        assert_eq!(out["debug_info"]["logged_at_level"], json!("warning"));
        assert_eq!(out["debug_info"]["message"], json!("checkpoint"));

        processor.execute(&input(&[])).await.unwrap();
        let history = engine_ctx.variable("debug_history").unwrap();
        assert_eq!(history.as_array().unwrap().len(), 2);
        assert_eq!(history[0]["node_id"], json!("dbg"));
    }

    #[test]
    fn debug_rejects_unknown_level() {
        let engine_ctx = ExecutionContext::new("flow", None);
        let node = FlowNode::new("dbg", "debug").with_config("logLevel", json!("loud"));
        assert!(DebugProcessor::from_node(&node, FlowContext::new(&engine_ctx)).is_err());
    }
}
