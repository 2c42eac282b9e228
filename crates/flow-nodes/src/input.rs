//! Input nodes: entry points that shape operator- or trigger-supplied
//! values for the rest of the flow.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use flow_engine::{FlowContext, FlowEngineError, FlowNode, Processor, Result};

use crate::props::{coerce_bool, coerce_f64, f64_prop, input_value, now_rfc3339, u64_prop};

/// Momentary button: emits its configured value while pressed
pub struct ButtonProcessor {
    node_id: String,
    value: Value,
    ctx: FlowContext,
}

impl ButtonProcessor {
    pub fn from_node(node: &FlowNode, ctx: FlowContext) -> Result<Self> {
        Ok(Self {
            node_id: node.id.clone(),
            value: node.config.get("value").cloned().unwrap_or(json!(true)),
            ctx,
        })
    }
}

#[async_trait]
impl Processor for ButtonProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "button"
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let pressed = input
            .get("pressed")
            .and_then(coerce_bool)
            .unwrap_or(false);
        let timestamp = now_rfc3339();
        let mut output = HashMap::new();
        if pressed {
            self.ctx.set_variable(
                format!("button_{}", self.node_id),
                json!({ "pressed": true, "timestamp": timestamp }),
            );
            output.insert("output".to_string(), self.value.clone());
            output.insert("pressed".to_string(), json!(true));
            output.insert("timestamp".to_string(), json!(timestamp));
        } else {
            output.insert("output".to_string(), Value::Null);
            output.insert("pressed".to_string(), json!(false));
        }
        Ok(output)
    }
}

/// Bounded numeric input with step and normalization
pub struct SliderProcessor {
    node_id: String,
    min: f64,
    max: f64,
    default_value: f64,
}

impl SliderProcessor {
    pub fn from_node(node: &FlowNode, _ctx: FlowContext) -> Result<Self> {
        let min = f64_prop(&node.config, "min").unwrap_or(0.0);
        let max = f64_prop(&node.config, "max").unwrap_or(100.0);
        let step = f64_prop(&node.config, "step").unwrap_or(1.0);
        if min >= max {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                format!("min ({min}) must be less than max ({max})"),
            ));
        }
        if step <= 0.0 {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                format!("step must be positive, got {step}"),
            ));
        }
        Ok(Self {
            node_id: node.id.clone(),
            min,
            max,
            default_value: f64_prop(&node.config, "defaultValue").unwrap_or(min),
        })
    }
}

#[async_trait]
impl Processor for SliderProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "slider"
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let value = input_value(input)
            .and_then(coerce_f64)
            .unwrap_or(self.default_value)
            .clamp(self.min, self.max);
        let normalized = (value - self.min) / (self.max - self.min);
        let mut output = HashMap::new();
        output.insert("output".to_string(), json!(value));
        output.insert("min".to_string(), json!(self.min));
        output.insert("max".to_string(), json!(self.max));
        output.insert("normalized".to_string(), json!(normalized));
        Ok(output)
    }
}

/// Free text with optional length limit
pub struct TextInputProcessor {
    node_id: String,
    max_length: Option<usize>,
}

impl TextInputProcessor {
    pub fn from_node(node: &FlowNode, _ctx: FlowContext) -> Result<Self> {
        let max_length = match u64_prop(&node.config, "maxLength") {
            Some(0) => {
                return Err(FlowEngineError::invalid_config(
                    &node.id,
                    "maxLength must be positive",
                ))
            }
            Some(n) => Some(n as usize),
            None => None,
        };
        Ok(Self {
            node_id: node.id.clone(),
            max_length,
        })
    }
}

#[async_trait]
impl Processor for TextInputProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "text-input"
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = match input_value(input) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let text: String = match self.max_length {
            Some(limit) => raw.chars().take(limit).collect(),
            None => raw,
        };
        let mut output = HashMap::new();
        output.insert("length".to_string(), json!(text.chars().count()));
        output.insert("is_empty".to_string(), json!(text.is_empty()));
        output.insert(
            "words".to_string(),
            json!(text.split_whitespace().count()),
        );
        output.insert("output".to_string(), json!(text));
        Ok(output)
    }
}

/// Validated numeric input with clamping and rounding
pub struct NumberInputProcessor {
    node_id: String,
    min: Option<f64>,
    max: Option<f64>,
    decimals: Option<u32>,
}

impl NumberInputProcessor {
    pub fn from_node(node: &FlowNode, _ctx: FlowContext) -> Result<Self> {
        let min = f64_prop(&node.config, "min");
        let max = f64_prop(&node.config, "max");
        if let (Some(min), Some(max)) = (min, max) {
            if min >= max {
                return Err(FlowEngineError::invalid_config(
                    &node.id,
                    format!("min ({min}) must be less than max ({max})"),
                ));
            }
        }
        if let Some(step) = f64_prop(&node.config, "step") {
            if step <= 0.0 {
                return Err(FlowEngineError::invalid_config(
                    &node.id,
                    format!("step must be positive, got {step}"),
                ));
            }
        }
        let decimals = match node.config.get("decimals") {
            Some(value) => match value.as_u64() {
                Some(d) => Some(d as u32),
                None => {
                    return Err(FlowEngineError::invalid_config(
                        &node.id,
                        "decimals must be a non-negative integer",
                    ))
                }
            },
            None => None,
        };
        Ok(Self {
            node_id: node.id.clone(),
            min,
            max,
            decimals,
        })
    }
}

#[async_trait]
impl Processor for NumberInputProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "number-input"
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let raw = input_value(input)
            .ok_or_else(|| FlowEngineError::MissingInput("value".to_string()))?;
        let mut value = coerce_f64(raw).ok_or_else(|| {
            FlowEngineError::failed(format!("expected a numeric value, got {raw}"))
        })?;
        if let Some(min) = self.min {
            value = value.max(min);
        }
        if let Some(max) = self.max {
            value = value.min(max);
        }
        if let Some(decimals) = self.decimals {
            let factor = 10f64.powi(decimals as i32);
            value = (value * factor).round() / factor;
        }
        let mut output = HashMap::new();
        output.insert("output".to_string(), json!(value));
        output.insert("is_integer".to_string(), json!(value.fract() == 0.0));
        output.insert("is_positive".to_string(), json!(value > 0.0));
        output.insert("is_negative".to_string(), json!(value < 0.0));
        output.insert("abs".to_string(), json!(value.abs()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::ExecutionContext;

    fn ctx() -> FlowContext {
        FlowContext::new(&ExecutionContext::new("flow", None))
    }

    fn input(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn button_emits_value_only_when_pressed() {
        let node = FlowNode::new("b1", "button").with_config("value", json!("go"));
        let mut processor = ButtonProcessor::from_node(&node, ctx()).unwrap();

        let out = processor
            .execute(&input(&[("pressed", json!(true))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!("go"));
        assert_eq!(out["pressed"], json!(true));

        let out = processor.execute(&input(&[])).await.unwrap();
        assert_eq!(out["output"], Value::Null);
        assert_eq!(out["pressed"], json!(false));
    }

    #[tokio::test]
    async fn button_records_press_variable() {
        let engine_ctx = ExecutionContext::new("flow", None);
        let node = FlowNode::new("b1", "button");
        let mut processor =
            ButtonProcessor::from_node(&node, FlowContext::new(&engine_ctx)).unwrap();
        processor
            .execute(&input(&[("pressed", json!("yes"))]))
            .await
            .unwrap();
        let var = engine_ctx.variable("button_b1").expect("press recorded");
        assert_eq!(var["pressed"], json!(true));
    }

    #[tokio::test]
    async fn slider_clamps_and_normalizes() {
        let node = FlowNode::new("s1", "slider")
            .with_config("min", json!(10.0))
            .with_config("max", json!(20.0));
        let mut processor = SliderProcessor::from_node(&node, ctx()).unwrap();

        let out = processor
            .execute(&input(&[("value", json!(25.0))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(20.0));
        assert_eq!(out["normalized"], json!(1.0));

        let out = processor
            .execute(&input(&[("output", json!(15.0))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(15.0));
        assert_eq!(out["normalized"], json!(0.5));
    }

    #[test]
    fn slider_rejects_bad_ranges() {
        let node = FlowNode::new("s1", "slider")
            .with_config("min", json!(5.0))
            .with_config("max", json!(5.0));
        assert!(matches!(
            SliderProcessor::from_node(&node, ctx()),
            Err(FlowEngineError::InvalidConfig { .. })
        ));

        let node = FlowNode::new("s2", "slider").with_config("step", json!(0.0));
        assert!(SliderProcessor::from_node(&node, ctx()).is_err());
    }

    #[tokio::test]
    async fn slider_falls_back_to_default() {
        let node = FlowNode::new("s1", "slider").with_config("defaultValue", json!(42.0));
        let mut processor = SliderProcessor::from_node(&node, ctx()).unwrap();
        let out = processor.execute(&input(&[])).await.unwrap();
        assert_eq!(out["output"], json!(42.0));
    }

    #[tokio::test]
    async fn text_input_truncates_and_counts() {
        let node = FlowNode::new("t1", "text-input").with_config("maxLength", json!(5));
        let mut processor = TextInputProcessor::from_node(&node, ctx()).unwrap();
        let out = processor
            .execute(&input(&[("output", json!("hello world"))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!("hello"));
        assert_eq!(out["length"], json!(5));
        assert_eq!(out["words"], json!(1));
        assert_eq!(out["is_empty"], json!(false));
    }

    #[tokio::test]
    async fn text_input_handles_missing_input() {
        let node = FlowNode::new("t1", "text-input");
        let mut processor = TextInputProcessor::from_node(&node, ctx()).unwrap();
        let out = processor.execute(&input(&[])).await.unwrap();
        assert_eq!(out["output"], json!(""));
        assert_eq!(out["is_empty"], json!(true));
    }

    #[tokio::test]
    async fn number_input_clamps_rounds_and_classifies() {
        let node = FlowNode::new("n1", "number-input")
            .with_config("min", json!(-10.0))
            .with_config("max", json!(10.0))
            .with_config("decimals", json!(1));
        let mut processor = NumberInputProcessor::from_node(&node, ctx()).unwrap();

        let out = processor
            .execute(&input(&[("value", json!(-3.26))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(-3.3));
        assert_eq!(out["is_negative"], json!(true));
        assert_eq!(out["abs"], json!(3.3));

        let out = processor
            .execute(&input(&[("value", json!("99"))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(10.0));
        assert_eq!(out["is_integer"], json!(true));
    }

    #[tokio::test]
    async fn number_input_rejects_non_numeric() {
        let node = FlowNode::new("n1", "number-input");
        let mut processor = NumberInputProcessor::from_node(&node, ctx()).unwrap();
        assert!(processor.execute(&input(&[])).await.is_err());
        assert!(processor
            .execute(&input(&[("value", json!("not a number"))]))
            .await
            .is_err());
    }
}
