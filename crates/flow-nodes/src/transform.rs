//! Stateful transform nodes: sliding-window statistics over the values
//! flowing through them. Window state is private to the processor and
//! therefore to the run.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::{json, Value};

use flow_engine::{FlowContext, FlowEngineError, FlowNode, Processor, Result};

use crate::props::{coerce_f64, input_value, str_prop};

const DEFAULT_WINDOW_SIZE: usize = 10;

/// Mean over the last `window_size` values
pub struct MovingAverageProcessor {
    node_id: String,
    window_size: usize,
    window: VecDeque<f64>,
    samples_seen: u64,
}

impl MovingAverageProcessor {
    pub fn from_node(node: &FlowNode, _ctx: FlowContext) -> Result<Self> {
        let window_size = match node.config.get("windowSize") {
            Some(value) => match value.as_u64() {
                Some(n) if n > 0 => n as usize,
                _ => {
                    return Err(FlowEngineError::invalid_config(
                        &node.id,
                        "windowSize must be a positive integer",
                    ))
                }
            },
            None => DEFAULT_WINDOW_SIZE,
        };
        Ok(Self {
            node_id: node.id.clone(),
            window_size,
            window: VecDeque::with_capacity(window_size),
            samples_seen: 0,
        })
    }
}

#[async_trait]
impl Processor for MovingAverageProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "moving-average"
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = input_value(input)
            .ok_or_else(|| FlowEngineError::MissingInput("value".to_string()))?;
        let value = coerce_f64(raw).ok_or_else(|| {
            FlowEngineError::failed(format!("expected a numeric value, got {raw}"))
        })?;

        self.samples_seen += 1;
        self.window.push_back(value);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let sum: f64 = self.window.iter().sum();
        let average = sum / self.window.len() as f64;
        let min = self.window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self
            .window
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        // Full once the window has turned over at least once.
        let window_full = self.samples_seen > self.window_size as u64;

        let mut output = HashMap::new();
        output.insert("output".to_string(), json!(average));
        output.insert("current_value".to_string(), json!(value));
        output.insert("window_size".to_string(), json!(self.window.len()));
        output.insert("window_full".to_string(), json!(window_full));
        output.insert("min_in_window".to_string(), json!(min));
        output.insert("max_in_window".to_string(), json!(max));
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MinMaxMode {
    Min,
    Max,
    Both,
}

/// Tracks extremes, either over a window or over the whole run
pub struct MinMaxProcessor {
    node_id: String,
    mode: MinMaxMode,
    window: Option<VecDeque<f64>>,
    window_size: usize,
    running_min: f64,
    running_max: f64,
}

impl MinMaxProcessor {
    pub fn from_node(node: &FlowNode, _ctx: FlowContext) -> Result<Self> {
        let mode = match str_prop(&node.config, "mode").as_deref() {
            None | Some("both") => MinMaxMode::Both,
            Some("min") => MinMaxMode::Min,
            Some("max") => MinMaxMode::Max,
            Some(other) => {
                return Err(FlowEngineError::invalid_config(
                    &node.id,
                    format!("mode must be min, max, or both, got '{other}'"),
                ))
            }
        };
        let window_size = match node.config.get("windowSize") {
            Some(value) => match value.as_u64() {
                Some(n) if n > 0 => Some(n as usize),
                _ => {
                    return Err(FlowEngineError::invalid_config(
                        &node.id,
                        "windowSize must be a positive integer",
                    ))
                }
            },
            None => None,
        };
        Ok(Self {
            node_id: node.id.clone(),
            mode,
            window: window_size.map(VecDeque::with_capacity),
            window_size: window_size.unwrap_or(0),
            running_min: f64::INFINITY,
            running_max: f64::NEG_INFINITY,
        })
    }
}

#[async_trait]
impl Processor for MinMaxProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "min-max"
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = input_value(input)
            .ok_or_else(|| FlowEngineError::MissingInput("value".to_string()))?;
        let value = coerce_f64(raw).ok_or_else(|| {
            FlowEngineError::failed(format!("expected a numeric value, got {raw}"))
        })?;

        let (min, max) = match &mut self.window {
            Some(window) => {
                window.push_back(value);
                if window.len() > self.window_size {
                    window.pop_front();
                }
                let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                (min, max)
            }
            None => {
                self.running_min = self.running_min.min(value);
                self.running_max = self.running_max.max(value);
                (self.running_min, self.running_max)
            }
        };

        let primary = match self.mode {
            MinMaxMode::Min => json!(min),
            MinMaxMode::Max => json!(max),
            MinMaxMode::Both => json!({ "min": min, "max": max }),
        };

        let mut output = HashMap::new();
        output.insert("output".to_string(), primary);
        output.insert("current_value".to_string(), json!(value));
        output.insert("min".to_string(), json!(min));
        output.insert("max".to_string(), json!(max));
        output.insert("range".to_string(), json!(max - min));
        Ok(output)
    }
}
