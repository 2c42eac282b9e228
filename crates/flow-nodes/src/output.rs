//! Output nodes: digital/analog control signals and operator-facing
//! displays. All of them publish through the broadcast collaborator,
//! which is why they count as I/O-bound for the hybrid strategy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use flow_engine::{
    BroadcastSink, FlowContext, FlowEngineError, FlowNode, Processor, Result,
};

use crate::props::{
    bool_prop, coerce_bool, coerce_f64, f64_prop, input_value, now_rfc3339, str_prop, u64_prop,
};

const DISPLAY_HISTORY_LIMIT: usize = 100;

/// Drives a digital (on/off) output pin
pub struct DigitalOutputProcessor {
    node_id: String,
    pin: Option<u64>,
    invert: bool,
    state: bool,
    broadcast: Arc<dyn BroadcastSink>,
    ctx: FlowContext,
}

impl DigitalOutputProcessor {
    pub fn from_node(
        node: &FlowNode,
        ctx: FlowContext,
        broadcast: Arc<dyn BroadcastSink>,
    ) -> Result<Self> {
        let pin = match node.config.get("outputPin") {
            Some(value) => match value.as_u64() {
                Some(pin) => Some(pin),
                None => {
                    return Err(FlowEngineError::invalid_config(
                        &node.id,
                        "outputPin must be a non-negative integer",
                    ))
                }
            },
            None => None,
        };
        Ok(Self {
            node_id: node.id.clone(),
            pin,
            invert: bool_prop(&node.config, "invertLogic").unwrap_or(false),
            state: bool_prop(&node.config, "initialState").unwrap_or(false),
            broadcast,
            ctx,
        })
    }
}

#[async_trait]
impl Processor for DigitalOutputProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "digital-output"
    }

    fn is_io_bound(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = input_value(input)
            .ok_or_else(|| FlowEngineError::MissingInput("value".to_string()))?;
        let requested = coerce_bool(raw).ok_or_else(|| {
            FlowEngineError::failed(format!("cannot convert {raw} to a boolean state"))
        })?;
        self.state = if self.invert { !requested } else { requested };
        let timestamp = now_rfc3339();

        self.broadcast
            .publish_control(
                self.ctx.execution_id(),
                json!({
                    "type": "digital_output",
                    "nodeId": self.node_id,
                    "pin": self.pin,
                    "state": self.state,
                    "timestamp": timestamp,
                }),
            )
            .await
            .map_err(|err| FlowEngineError::failed(format!("output publish failed: {err}")))?;

        let mut output = HashMap::new();
        output.insert("output".to_string(), json!(self.state));
        output.insert("pin".to_string(), json!(self.pin));
        output.insert(
            "state".to_string(),
            json!(if self.state { "HIGH" } else { "LOW" }),
        );
        output.insert("timestamp".to_string(), json!(timestamp));
        Ok(output)
    }
}

/// Drives an analog output with range clamping and quantization
pub struct AnalogOutputProcessor {
    node_id: String,
    pin: Option<u64>,
    min_value: f64,
    max_value: f64,
    resolution: u32,
    broadcast: Arc<dyn BroadcastSink>,
    ctx: FlowContext,
}

impl AnalogOutputProcessor {
    pub fn from_node(
        node: &FlowNode,
        ctx: FlowContext,
        broadcast: Arc<dyn BroadcastSink>,
    ) -> Result<Self> {
        let min_value = f64_prop(&node.config, "minValue").unwrap_or(0.0);
        let max_value = f64_prop(&node.config, "maxValue").unwrap_or(255.0);
        if min_value >= max_value {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                format!("minValue ({min_value}) must be less than maxValue ({max_value})"),
            ));
        }
        let resolution = u64_prop(&node.config, "resolution").unwrap_or(8);
        if !(1..=16).contains(&resolution) {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                format!("resolution must be between 1 and 16 bits, got {resolution}"),
            ));
        }
        Ok(Self {
            node_id: node.id.clone(),
            pin: u64_prop(&node.config, "outputPin"),
            min_value,
            max_value,
            resolution: resolution as u32,
            broadcast,
            ctx,
        })
    }
}

#[async_trait]
impl Processor for AnalogOutputProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "analog-output"
    }

    fn is_io_bound(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = input_value(input)
            .ok_or_else(|| FlowEngineError::MissingInput("value".to_string()))?;
        let value = coerce_f64(raw)
            .ok_or_else(|| {
                FlowEngineError::failed(format!("cannot convert {raw} to a number"))
            })?
            .clamp(self.min_value, self.max_value);

        let span = self.max_value - self.min_value;
        let levels = (1u32 << self.resolution) - 1;
        let fraction = (value - self.min_value) / span;
        let digital = (fraction * levels as f64).round() as u64;
        let percentage = fraction * 100.0;
        let timestamp = now_rfc3339();

        self.broadcast
            .publish_control(
                self.ctx.execution_id(),
                json!({
                    "type": "analog_output",
                    "nodeId": self.node_id,
                    "pin": self.pin,
                    "value": value,
                    "digitalValue": digital,
                    "timestamp": timestamp,
                }),
            )
            .await
            .map_err(|err| FlowEngineError::failed(format!("output publish failed: {err}")))?;

        let mut output = HashMap::new();
        output.insert("output".to_string(), json!(value));
        output.insert("digital_value".to_string(), json!(digital));
        output.insert("pin".to_string(), json!(self.pin));
        output.insert("percentage".to_string(), json!(percentage));
        output.insert("timestamp".to_string(), json!(timestamp));
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayType {
    Text,
    Number,
    Chart,
    Gauge,
}

impl DisplayType {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "chart" => Some(Self::Chart),
            "gauge" => Some(Self::Gauge),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Chart => "chart",
            Self::Gauge => "gauge",
        }
    }
}

/// Formats values for an operator-facing display widget
pub struct DisplayProcessor {
    node_id: String,
    display_type: DisplayType,
    precision: u32,
    format: Option<String>,
    unit: Option<String>,
    history: VecDeque<Value>,
    broadcast: Arc<dyn BroadcastSink>,
    ctx: FlowContext,
}

impl DisplayProcessor {
    pub fn from_node(
        node: &FlowNode,
        ctx: FlowContext,
        broadcast: Arc<dyn BroadcastSink>,
    ) -> Result<Self> {
        let display_type = match str_prop(&node.config, "displayType") {
            Some(tag) => DisplayType::parse(&tag).ok_or_else(|| {
                FlowEngineError::invalid_config(
                    &node.id,
                    format!("unknown displayType '{tag}'"),
                )
            })?,
            None => DisplayType::Text,
        };
        Ok(Self {
            node_id: node.id.clone(),
            display_type,
            precision: u64_prop(&node.config, "precision").unwrap_or(2) as u32,
            format: str_prop(&node.config, "format"),
            unit: str_prop(&node.config, "unit"),
            history: VecDeque::new(),
            broadcast,
            ctx,
        })
    }

    fn format_value(&self, value: Option<&Value>) -> String {
        let mut text = match value {
            None => "No data".to_string(),
            Some(v) => match coerce_f64(v) {
                Some(n) if matches!(self.display_type, DisplayType::Number | DisplayType::Gauge) =>
                {
                    format!("{:.*}", self.precision as usize, n)
                }
                _ => match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            },
        };
        if let Some(template) = &self.format {
            text = template.replace("{value}", &text);
        }
        if let Some(unit) = &self.unit {
            text = format!("{text} {unit}");
        }
        text
    }
}

#[async_trait]
impl Processor for DisplayProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "display"
    }

    fn is_io_bound(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = input_value(input).cloned();
        let formatted = self.format_value(raw.as_ref());
        let timestamp = now_rfc3339();

        if self.history.len() >= DISPLAY_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(json!({
            "value": raw.clone().unwrap_or(Value::Null),
            "formatted": formatted,
            "timestamp": timestamp,
        }));

        self.broadcast
            .publish_control(
                self.ctx.execution_id(),
                json!({
                    "type": "display_update",
                    "nodeId": self.node_id,
                    "displayType": self.display_type.as_str(),
                    "value": formatted,
                    "rawValue": raw.clone().unwrap_or(Value::Null),
                    "timestamp": timestamp,
                }),
            )
            .await
            .map_err(|err| FlowEngineError::failed(format!("display publish failed: {err}")))?;

        let mut output = HashMap::new();
        output.insert("output".to_string(), json!(formatted));
        output.insert(
            "raw_value".to_string(),
            raw.unwrap_or(Value::Null),
        );
        output.insert(
            "display_type".to_string(),
            json!(self.display_type.as_str()),
        );
        output.insert("timestamp".to_string(), json!(timestamp));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::{ExecutionContext, MemoryBroadcastSink};

    fn ctx() -> FlowContext {
        FlowContext::new(&ExecutionContext::new("flow", Some("exec-1".to_string())))
    }

    fn input(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn digital_output_coerces_inverts_and_publishes() {
        let sink = Arc::new(MemoryBroadcastSink::new());
        let node = FlowNode::new("d1", "digital-output")
            .with_config("outputPin", json!(13))
            .with_config("invertLogic", json!(true));
        let mut processor =
            DigitalOutputProcessor::from_node(&node, ctx(), sink.clone()).unwrap();

        let out = processor
            .execute(&input(&[("value", json!("high"))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(false), "inverted");
        assert_eq!(out["state"], json!("LOW"));
        assert_eq!(out["pin"], json!(13));

        let messages = sink.control_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "exec-1");
        assert_eq!(messages[0].1["type"], "digital_output");
    }

    #[tokio::test]
    async fn digital_output_requires_an_input_value() {
        let node = FlowNode::new("d1", "digital-output");
        let mut processor =
            DigitalOutputProcessor::from_node(&node, ctx(), Arc::new(MemoryBroadcastSink::new()))
                .unwrap();
        assert!(matches!(
            processor.execute(&input(&[])).await,
            Err(FlowEngineError::MissingInput(_))
        ));
    }

    #[tokio::test]
    async fn analog_output_quantizes_to_resolution() {
        let sink = Arc::new(MemoryBroadcastSink::new());
        let node = FlowNode::new("a1", "analog-output")
            .with_config("minValue", json!(0.0))
            .with_config("maxValue", json!(10.0))
            .with_config("resolution", json!(8));
        let mut processor =
            AnalogOutputProcessor::from_node(&node, ctx(), sink.clone()).unwrap();

        let out = processor
            .execute(&input(&[("value", json!(5.0))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(5.0));
        assert_eq!(out["digital_value"], json!(128), "255 * 0.5 rounded");
        assert_eq!(out["percentage"], json!(50.0));

        // out of range clamps
        let out = processor
            .execute(&input(&[("value", json!(42.0))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(10.0));
        assert_eq!(out["digital_value"], json!(255));
    }

    #[test]
    fn analog_output_validates_config() {
        let bad_range = FlowNode::new("a1", "analog-output")
            .with_config("minValue", json!(5.0))
            .with_config("maxValue", json!(5.0));
        assert!(AnalogOutputProcessor::from_node(
            &bad_range,
            ctx(),
            Arc::new(MemoryBroadcastSink::new())
        )
        .is_err());

        let bad_resolution =
            FlowNode::new("a2", "analog-output").with_config("resolution", json!(40));
        assert!(AnalogOutputProcessor::from_node(
            &bad_resolution,
            ctx(),
            Arc::new(MemoryBroadcastSink::new())
        )
        .is_err());
    }

    #[tokio::test]
    async fn display_formats_numbers_units_and_missing_data() {
        let sink = Arc::new(MemoryBroadcastSink::new());
        let node = FlowNode::new("disp", "display")
            .with_config("displayType", json!("number"))
            .with_config("precision", json!(1))
            .with_config("unit", json!("°C"));
        let mut processor = DisplayProcessor::from_node(&node, ctx(), sink.clone()).unwrap();

        let out = processor
            .execute(&input(&[("output", json!(21.57))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!("21.6 °C"));
        assert_eq!(out["raw_value"], json!(21.57));

        let out = processor.execute(&input(&[])).await.unwrap();
        assert_eq!(out["output"], json!("No data °C"));

        assert_eq!(sink.control_messages().len(), 2);
    }

    #[tokio::test]
    async fn display_applies_format_template() {
        let node = FlowNode::new("disp", "display").with_config("format", json!("val={value}!"));
        let mut processor =
            DisplayProcessor::from_node(&node, ctx(), Arc::new(MemoryBroadcastSink::new()))
                .unwrap();
        let out = processor
            .execute(&input(&[("output", json!("ok"))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!("val=ok!"));
    }

    #[test]
    fn display_rejects_unknown_type() {
        let node = FlowNode::new("disp", "display").with_config("displayType", json!("hologram"));
        assert!(DisplayProcessor::from_node(
            &node,
            ctx(),
            Arc::new(MemoryBroadcastSink::new())
        )
        .is_err());
    }
}
