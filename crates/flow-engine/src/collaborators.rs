//! External collaborator seams
//!
//! The engine never talks to storage, transport, or hardware directly;
//! it goes through these traits. The `Null*` implementations make the
//! engine usable standalone, the `Memory*` ones back the tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::context::ExecutionStatus;
use crate::error::Result;

/// Persistence for run and node-run records. Write-only from the
/// engine's side: the engine creates and updates records but never
/// queries them back.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run record; the returned id seeds the execution id
    async fn create_run(&self, flow_id: &str) -> Result<String>;

    /// Update the run's status, final result payload, and error
    async fn update_run(
        &self,
        run_id: &str,
        status: ExecutionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()>;

    /// Record that a node began executing within a run
    async fn create_node_run(&self, run_id: &str, node_id: &str) -> Result<()>;

    /// Record a node's terminal status, output, and duration
    async fn update_node_run(
        &self,
        run_id: &str,
        node_id: &str,
        status: ExecutionStatus,
        output: Option<Value>,
        duration_ms: Option<f64>,
    ) -> Result<()>;
}

/// Fan-out for live node outputs and device control messages
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Publish a node's output after it completes
    async fn publish_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: &Value,
    ) -> Result<()>;

    /// Publish a control message (digital/analog output, display update)
    async fn publish_control(&self, execution_id: &str, message: Value) -> Result<()>;
}

/// Metadata about a registered device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub active: bool,
}

/// A single sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub value: Value,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Access to the device fleet for device nodes
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Look up a device; `None` when the reference is unknown
    async fn describe(&self, device_ref: &str) -> Result<Option<DeviceInfo>>;

    /// Latest reading for a device variable, if any exists
    async fn read_latest(&self, device_ref: &str, variable: &str)
        -> Result<Option<DeviceReading>>;

    /// Send a command value to a device variable
    async fn send_command(&self, device_ref: &str, variable: &str, value: &Value) -> Result<()>;
}

/// Run store that records nothing and hands out fresh ids
pub struct NullRunStore;

#[async_trait]
impl RunStore for NullRunStore {
    async fn create_run(&self, _flow_id: &str) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn update_run(
        &self,
        _run_id: &str,
        _status: ExecutionStatus,
        _result: Option<Value>,
        _error: Option<String>,
    ) -> Result<()> {
        Ok(())
    }

    async fn create_node_run(&self, _run_id: &str, _node_id: &str) -> Result<()> {
        Ok(())
    }

    async fn update_node_run(
        &self,
        _run_id: &str,
        _node_id: &str,
        _status: ExecutionStatus,
        _output: Option<Value>,
        _duration_ms: Option<f64>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Broadcast sink that discards everything
pub struct NullBroadcastSink;

#[async_trait]
impl BroadcastSink for NullBroadcastSink {
    async fn publish_node_output(
        &self,
        _execution_id: &str,
        _node_id: &str,
        _output: &Value,
    ) -> Result<()> {
        Ok(())
    }

    async fn publish_control(&self, _execution_id: &str, _message: Value) -> Result<()> {
        Ok(())
    }
}

/// Gateway with no devices behind it
pub struct NullDeviceGateway;

#[async_trait]
impl DeviceGateway for NullDeviceGateway {
    async fn describe(&self, _device_ref: &str) -> Result<Option<DeviceInfo>> {
        Ok(None)
    }

    async fn read_latest(
        &self,
        _device_ref: &str,
        _variable: &str,
    ) -> Result<Option<DeviceReading>> {
        Ok(None)
    }

    async fn send_command(&self, _device_ref: &str, _variable: &str, _value: &Value) -> Result<()> {
        Ok(())
    }
}

/// Stored node-run record (test inspection)
#[derive(Debug, Clone)]
pub struct NodeRunRecord {
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub duration_ms: Option<f64>,
}

/// Stored run record (test inspection)
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub flow_id: String,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub node_runs: HashMap<String, NodeRunRecord>,
}

/// In-memory run store for tests and standalone use
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a run record
    pub fn run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, flow_id: &str) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                run_id.clone(),
                RunRecord {
                    flow_id: flow_id.to_string(),
                    status: ExecutionStatus::Pending,
                    result: None,
                    error: None,
                    node_runs: HashMap::new(),
                },
            );
        Ok(run_id)
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: ExecutionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = runs.get_mut(run_id) {
            record.status = status;
            if result.is_some() {
                record.result = result;
            }
            if error.is_some() {
                record.error = error;
            }
        }
        Ok(())
    }

    async fn create_node_run(&self, run_id: &str, node_id: &str) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = runs.get_mut(run_id) {
            record.node_runs.insert(
                node_id.to_string(),
                NodeRunRecord {
                    status: ExecutionStatus::Running,
                    output: None,
                    duration_ms: None,
                },
            );
        }
        Ok(())
    }

    async fn update_node_run(
        &self,
        run_id: &str,
        node_id: &str,
        status: ExecutionStatus,
        output: Option<Value>,
        duration_ms: Option<f64>,
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = runs.get_mut(run_id) {
            if let Some(node_run) = record.node_runs.get_mut(node_id) {
                node_run.status = status;
                node_run.output = output;
                node_run.duration_ms = duration_ms;
            }
        }
        Ok(())
    }
}

/// In-memory broadcast sink recording every published message
#[derive(Default)]
pub struct MemoryBroadcastSink {
    node_outputs: Mutex<Vec<(String, String, Value)>>,
    control_messages: Mutex<Vec<(String, Value)>>,
}

impl MemoryBroadcastSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// (execution_id, node_id, output) triples in publish order
    pub fn node_outputs(&self) -> Vec<(String, String, Value)> {
        self.node_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// (execution_id, message) pairs in publish order
    pub fn control_messages(&self) -> Vec<(String, Value)> {
        self.control_messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BroadcastSink for MemoryBroadcastSink {
    async fn publish_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: &Value,
    ) -> Result<()> {
        self.node_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((
                execution_id.to_string(),
                node_id.to_string(),
                output.clone(),
            ));
        Ok(())
    }

    async fn publish_control(&self, execution_id: &str, message: Value) -> Result<()> {
        self.control_messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((execution_id.to_string(), message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_run_store_tracks_run_and_node_runs() {
        let store = MemoryRunStore::new();
        let run_id = store.create_run("flow-1").await.unwrap();

        store.create_node_run(&run_id, "a").await.unwrap();
        store
            .update_node_run(
                &run_id,
                "a",
                ExecutionStatus::Completed,
                Some(json!({ "output": 1 })),
                Some(12.5),
            )
            .await
            .unwrap();
        store
            .update_run(&run_id, ExecutionStatus::Completed, None, None)
            .await
            .unwrap();

        let record = store.run(&run_id).unwrap();
        assert_eq!(record.flow_id, "flow-1");
        assert_eq!(record.status, ExecutionStatus::Completed);
        let node_run = &record.node_runs["a"];
        assert_eq!(node_run.status, ExecutionStatus::Completed);
        assert_eq!(node_run.duration_ms, Some(12.5));
    }

    #[tokio::test]
    async fn memory_broadcast_records_both_channels() {
        let sink = MemoryBroadcastSink::new();
        sink.publish_node_output("e1", "a", &json!({ "output": 2 }))
            .await
            .unwrap();
        sink.publish_control("e1", json!({ "type": "digital_output" }))
            .await
            .unwrap();
        assert_eq!(sink.node_outputs().len(), 1);
        assert_eq!(sink.control_messages().len(), 1);
        assert_eq!(sink.node_outputs()[0].1, "a");
    }
}
