//! Device nodes: read sensor values from and write commands to the
//! device fleet behind a [`DeviceGateway`].
//!
//! Device references are validated at build time by the factory, so a
//! flow pointing at an unknown or inactive device fails before any
//! node runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use flow_engine::{
    DeviceGateway, FlowContext, FlowEngineError, FlowNode, Processor, ProcessorFactory, Result,
};

use crate::props::{coerce_bool, coerce_f64, input_value, now_rfc3339, str_prop};

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeviceMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeviceDataType {
    Number,
    String,
    Boolean,
}

/// Reads from or writes to a single device variable
pub struct DeviceProcessor {
    node_id: String,
    device_ref: String,
    device_name: String,
    variable: String,
    mode: DeviceMode,
    data_type: DeviceDataType,
    gateway: Arc<dyn DeviceGateway>,
}

impl DeviceProcessor {
    fn parse_mode(node: &FlowNode) -> Result<DeviceMode> {
        match str_prop(&node.config, "mode").as_deref() {
            None | Some("read") => Ok(DeviceMode::Read),
            Some("write") => Ok(DeviceMode::Write),
            Some(other) => Err(FlowEngineError::invalid_config(
                &node.id,
                format!("unknown device mode '{other}' (expected read or write)"),
            )),
        }
    }

    fn parse_data_type(node: &FlowNode) -> Result<DeviceDataType> {
        match str_prop(&node.config, "dataType").as_deref() {
            None | Some("number") => Ok(DeviceDataType::Number),
            Some("string") => Ok(DeviceDataType::String),
            Some("boolean") => Ok(DeviceDataType::Boolean),
            Some(other) => Err(FlowEngineError::invalid_config(
                &node.id,
                format!("unknown device data type '{other}'"),
            )),
        }
    }

    fn coerce_command(&self, value: &Value) -> Result<Value> {
        match self.data_type {
            DeviceDataType::Number => coerce_f64(value).map(|n| json!(n)).ok_or_else(|| {
                FlowEngineError::failed(format!(
                    "device node '{}' cannot send {value} as a number",
                    self.node_id
                ))
            }),
            DeviceDataType::String => Ok(match value {
                Value::String(s) => json!(s),
                other => json!(other.to_string()),
            }),
            DeviceDataType::Boolean => coerce_bool(value).map(|b| json!(b)).ok_or_else(|| {
                FlowEngineError::failed(format!(
                    "device node '{}' cannot send {value} as a boolean",
                    self.node_id
                ))
            }),
        }
    }

    async fn read(&self) -> Result<HashMap<String, Value>> {
        let reading = self
            .gateway
            .read_latest(&self.device_ref, &self.variable)
            .await?;

        let mut output = HashMap::new();
        output.insert("device".to_string(), json!(self.device_name));
        output.insert("variable".to_string(), json!(self.variable));
        match reading {
            Some(reading) => {
                output.insert("output".to_string(), reading.value.clone());
                output.insert("raw_value".to_string(), reading.value);
                output.insert("unit".to_string(), json!(reading.unit));
                output.insert("timestamp".to_string(), json!(reading.timestamp.to_rfc3339()));
                output.insert("status".to_string(), json!("success"));
            }
            None => {
                output.insert("output".to_string(), Value::Null);
                output.insert("timestamp".to_string(), json!(now_rfc3339()));
                output.insert("status".to_string(), json!("no_data"));
            }
        }
        Ok(output)
    }

    async fn write(&self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let value = input_value(input).ok_or_else(|| {
            FlowEngineError::MissingInput(format!(
                "device write '{}' needs an upstream value",
                self.node_id
            ))
        })?;
        let command = self.coerce_command(value)?;
        self.gateway
            .send_command(&self.device_ref, &self.variable, &command)
            .await?;

        let mut output = HashMap::new();
        output.insert("output".to_string(), command);
        output.insert("device".to_string(), json!(self.device_name));
        output.insert("variable".to_string(), json!(self.variable));
        output.insert("timestamp".to_string(), json!(now_rfc3339()));
        output.insert("status".to_string(), json!("sent"));
        Ok(output)
    }
}

#[async_trait]
impl Processor for DeviceProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "device"
    }

    fn is_io_bound(&self) -> bool {
        true
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        match self.mode {
            DeviceMode::Read => self.read().await,
            DeviceMode::Write => self.write(input).await,
        }
    }
}

/// Builds [`DeviceProcessor`]s and verifies the referenced device is
/// known and active before handing one out
pub struct DeviceProcessorFactory {
    gateway: Arc<dyn DeviceGateway>,
}

impl DeviceProcessorFactory {
    pub fn new(gateway: Arc<dyn DeviceGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ProcessorFactory for DeviceProcessorFactory {
    async fn create(&self, node: &FlowNode, _ctx: FlowContext) -> Result<Box<dyn Processor>> {
        let device_ref = str_prop(&node.config, "deviceUuid").ok_or_else(|| {
            FlowEngineError::invalid_config(&node.id, "device node needs a deviceUuid")
        })?;
        let variable = str_prop(&node.config, "variable").ok_or_else(|| {
            FlowEngineError::invalid_config(&node.id, "device node needs a variable")
        })?;
        let mode = DeviceProcessor::parse_mode(node)?;
        let data_type = DeviceProcessor::parse_data_type(node)?;

        let info = self
            .gateway
            .describe(&device_ref)
            .await?
            .ok_or_else(|| {
                FlowEngineError::invalid_config(
                    &node.id,
                    format!("unknown device '{device_ref}'"),
                )
            })?;
        if !info.active {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                format!("device '{}' is inactive", info.name),
            ));
        }

        Ok(Box::new(DeviceProcessor {
            node_id: node.id.clone(),
            device_ref,
            device_name: info.name,
            variable,
            mode,
            data_type,
            gateway: Arc::clone(&self.gateway),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flow_engine::{DeviceInfo, DeviceReading, ExecutionContext};
    use std::sync::Mutex;

    /// Gateway backed by fixed data, recording sent commands
    struct StaticGateway {
        info: Option<DeviceInfo>,
        reading: Option<DeviceReading>,
        commands: Mutex<Vec<(String, String, Value)>>,
    }

    impl StaticGateway {
        fn with_reading(value: Value) -> Self {
            Self {
                info: Some(DeviceInfo {
                    name: "thermo-1".to_string(),
                    active: true,
                }),
                reading: Some(DeviceReading {
                    value,
                    unit: Some("C".to_string()),
                    timestamp: Utc::now(),
                }),
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeviceGateway for StaticGateway {
        async fn describe(&self, _device_ref: &str) -> Result<Option<DeviceInfo>> {
            Ok(self.info.clone())
        }

        async fn read_latest(
            &self,
            _device_ref: &str,
            _variable: &str,
        ) -> Result<Option<DeviceReading>> {
            Ok(self.reading.clone())
        }

        async fn send_command(
            &self,
            device_ref: &str,
            variable: &str,
            value: &Value,
        ) -> Result<()> {
            self.commands.lock().unwrap().push((
                device_ref.to_string(),
                variable.to_string(),
                value.clone(),
            ));
            Ok(())
        }
    }

    fn ctx() -> FlowContext {
        FlowContext::new(&ExecutionContext::new("flow", None))
    }

    fn device_node(mode: &str) -> FlowNode {
        FlowNode::new("dev1", "device")
            .with_config("deviceUuid", json!("dev-uuid"))
            .with_config("variable", json!("temperature"))
            .with_config("mode", json!(mode))
    }

    #[tokio::test]
    async fn read_mode_reports_the_latest_reading() {
        let gateway = Arc::new(StaticGateway::with_reading(json!(21.5)));
        let factory = DeviceProcessorFactory::new(gateway);
        let mut processor = factory.create(&device_node("read"), ctx()).await.unwrap();

        let out = processor.execute(&HashMap::new()).await.unwrap();
        assert_eq!(out["output"], json!(21.5));
        assert_eq!(out["device"], json!("thermo-1"));
        assert_eq!(out["unit"], json!("C"));
        assert_eq!(out["status"], json!("success"));
    }

    #[tokio::test]
    async fn read_mode_without_data_yields_no_data_status() {
        let gateway = Arc::new(StaticGateway {
            reading: None,
            ..StaticGateway::with_reading(json!(0))
        });
        let factory = DeviceProcessorFactory::new(gateway);
        let mut processor = factory.create(&device_node("read"), ctx()).await.unwrap();

        let out = processor.execute(&HashMap::new()).await.unwrap();
        assert_eq!(out["output"], Value::Null);
        assert_eq!(out["status"], json!("no_data"));
    }

    #[tokio::test]
    async fn write_mode_coerces_and_sends_the_command() {
        let gateway = Arc::new(StaticGateway::with_reading(json!(0)));
        let factory = DeviceProcessorFactory::new(Arc::clone(&gateway) as Arc<dyn DeviceGateway>);
        let mut processor = factory.create(&device_node("write"), ctx()).await.unwrap();

        let input = HashMap::from([("output".to_string(), json!("42.5"))]);
        let out = processor.execute(&input).await.unwrap();
        assert_eq!(out["status"], json!("sent"));
        assert_eq!(out["output"], json!(42.5));

        let commands = gateway.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].1, "temperature");
        assert_eq!(commands[0].2, json!(42.5));
    }

    #[tokio::test]
    async fn write_mode_without_input_is_a_missing_input_error() {
        let gateway = Arc::new(StaticGateway::with_reading(json!(0)));
        let factory = DeviceProcessorFactory::new(gateway);
        let mut processor = factory.create(&device_node("write"), ctx()).await.unwrap();

        let err = processor.execute(&HashMap::new()).await.unwrap_err();
        assert!(matches!(err, FlowEngineError::MissingInput(_)));
    }

    #[tokio::test]
    async fn factory_rejects_unknown_and_inactive_devices() {
        let unknown = Arc::new(StaticGateway {
            info: None,
            ..StaticGateway::with_reading(json!(0))
        });
        let err = DeviceProcessorFactory::new(unknown)
            .create(&device_node("read"), ctx())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowEngineError::InvalidConfig { .. }));

        let inactive = Arc::new(StaticGateway {
            info: Some(DeviceInfo {
                name: "thermo-1".to_string(),
                active: false,
            }),
            ..StaticGateway::with_reading(json!(0))
        });
        let err = DeviceProcessorFactory::new(inactive)
            .create(&device_node("read"), ctx())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("inactive"));
    }

    #[tokio::test]
    async fn factory_rejects_missing_config_and_bad_mode() {
        let gateway = Arc::new(StaticGateway::with_reading(json!(0)));
        let factory = DeviceProcessorFactory::new(gateway);

        let bare = FlowNode::new("dev1", "device");
        assert!(factory.create(&bare, ctx()).await.is_err());

        let bad_mode = device_node("sideways");
        assert!(factory.create(&bad_mode, ctx()).await.is_err());
    }
}
