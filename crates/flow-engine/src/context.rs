//! Shared execution state for a single flow run
//!
//! One `ExecutionContext` exists per run. It is cheap to clone (all clones
//! share the same state behind a single mutex) and every mutation goes
//! through a narrow method surface, so concurrent node tasks can never
//! observe half-updated state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::types::{NodeId, NodeRecord};

/// Run-level and node-level lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
    Paused,
}

impl ExecutionStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// One entry in the in-memory execution log ring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub execution_id: String,
    pub data: Value,
}

/// Aggregate metrics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub nodes_executed: u64,
    pub nodes_failed: u64,
    pub total_execution_time_ms: f64,
    pub average_node_time_ms: f64,
}

/// Per-status node tallies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Snapshot of a run's state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub flow_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub node_counts: NodeCounts,
    pub metrics: ExecutionMetrics,
    pub variables_count: usize,
    pub log_entries: usize,
}

const MAX_LOG_ENTRIES: usize = 1000;

struct ContextInner {
    flow_id: String,
    execution_id: String,
    status: ExecutionStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    node_status: HashMap<NodeId, ExecutionStatus>,
    node_results: HashMap<NodeId, NodeRecord>,
    variables: HashMap<String, Value>,
    log: VecDeque<LogEntry>,
    metrics: ExecutionMetrics,
}

impl ContextInner {
    fn log_event(&mut self, event_type: &str, data: Value) {
        if self.log.len() >= MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            execution_id: self.execution_id.clone(),
            data,
        });
    }

    fn node_status(&self, node_id: &str) -> ExecutionStatus {
        self.node_status
            .get(node_id)
            .copied()
            .unwrap_or(ExecutionStatus::Pending)
    }
}

/// Concurrency-safe state for one flow run
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl ExecutionContext {
    /// Create a context for a run; generates an execution id when none is
    /// supplied.
    pub fn new(flow_id: impl Into<String>, execution_id: Option<String>) -> Self {
        let execution_id = execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            inner: Arc::new(Mutex::new(ContextInner {
                flow_id: flow_id.into(),
                execution_id,
                status: ExecutionStatus::Pending,
                started_at: None,
                completed_at: None,
                error_message: None,
                node_status: HashMap::new(),
                node_results: HashMap::new(),
                variables: HashMap::new(),
                log: VecDeque::new(),
                metrics: ExecutionMetrics::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextInner> {
        // A poisoned lock means a panicking node task; the state itself
        // is still consistent because every mutation is a single call.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn execution_id(&self) -> String {
        self.lock().execution_id.clone()
    }

    pub fn flow_id(&self) -> String {
        self.lock().flow_id.clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().status
    }

    /// Running or Paused (the run is still in flight)
    pub fn is_running(&self) -> bool {
        matches!(
            self.status(),
            ExecutionStatus::Running | ExecutionStatus::Paused
        )
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Mark the run started
    pub fn start(&self) {
        let mut inner = self.lock();
        inner.status = ExecutionStatus::Running;
        inner.started_at = Some(Utc::now());
        let flow_id = inner.flow_id.clone();
        inner.log_event("execution_started", json!({ "flowId": flow_id }));
        log::info!("started flow execution {}", inner.execution_id);
    }

    /// Finalize the run and compute metrics.
    ///
    /// A Stopped run stays Stopped; otherwise the terminal status follows
    /// `success`.
    pub fn complete(&self, success: bool, error: Option<String>) {
        let mut inner = self.lock();
        let completed_at = Utc::now();
        inner.completed_at = Some(completed_at);
        if inner.status != ExecutionStatus::Stopped {
            inner.status = if success && error.is_none() {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
        }
        if let Some(err) = error {
            inner.error_message = Some(err);
        }

        if let Some(started) = inner.started_at {
            inner.metrics.total_execution_time_ms =
                (completed_at - started).num_milliseconds() as f64;
        }
        let node_times: Vec<f64> = inner
            .node_results
            .values()
            .filter_map(|record| record.result.get("execution_time_ms"))
            .filter_map(Value::as_f64)
            .collect();
        if !node_times.is_empty() {
            inner.metrics.average_node_time_ms =
                node_times.iter().sum::<f64>() / node_times.len() as f64;
        }

        let status = inner.status;
        let error_message = inner.error_message.clone();
        inner.log_event(
            "execution_completed",
            json!({ "status": status.to_string(), "error": error_message }),
        );
        log::info!(
            "flow execution {} finished with status {}",
            inner.execution_id,
            status
        );
    }

    /// Pause a running execution; returns false in any other state
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        if inner.status != ExecutionStatus::Running {
            return false;
        }
        inner.status = ExecutionStatus::Paused;
        inner.log_event("execution_paused", json!({}));
        log::info!("paused flow execution {}", inner.execution_id);
        true
    }

    /// Resume a paused execution; returns false in any other state
    pub fn resume(&self) -> bool {
        let mut inner = self.lock();
        if inner.status != ExecutionStatus::Paused {
            return false;
        }
        inner.status = ExecutionStatus::Running;
        inner.log_event("execution_resumed", json!({}));
        log::info!("resumed flow execution {}", inner.execution_id);
        true
    }

    /// Stop the execution. Stopped is terminal and survives `complete`.
    pub fn stop(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.status.is_terminal() {
            return false;
        }
        let reason = reason.into();
        inner.status = ExecutionStatus::Stopped;
        inner.error_message = Some(reason.clone());
        inner.log_event("execution_stopped", json!({ "reason": reason }));
        log::warn!("stopped flow execution {}: {}", inner.execution_id, reason);
        true
    }

    /// Record a node status transition
    pub fn set_node_status(&self, node_id: &str, status: ExecutionStatus) {
        let mut inner = self.lock();
        let old = inner.node_status(node_id);
        inner.node_status.insert(node_id.to_string(), status);
        match status {
            ExecutionStatus::Completed if old != ExecutionStatus::Completed => {
                inner.metrics.nodes_executed += 1;
            }
            ExecutionStatus::Failed if old != ExecutionStatus::Failed => {
                inner.metrics.nodes_failed += 1;
            }
            _ => {}
        }
        inner.log_event(
            "node_status_change",
            json!({ "nodeId": node_id, "from": old.to_string(), "to": status.to_string() }),
        );
        log::debug!("node {node_id} status {old} -> {status}");
    }

    /// Node status, Pending when the node has never been touched
    pub fn node_status(&self, node_id: &str) -> ExecutionStatus {
        self.lock().node_status(node_id)
    }

    /// Store a node's output, tagged with timestamp and execution id
    pub fn set_node_result(&self, node_id: &str, result: Value) {
        let mut inner = self.lock();
        let execution_id = inner.execution_id.clone();
        inner.node_results.insert(
            node_id.to_string(),
            NodeRecord {
                result,
                timestamp: Utc::now(),
                execution_id,
            },
        );
        inner.log_event("node_result_stored", json!({ "nodeId": node_id }));
    }

    /// The stored output of a node, if any
    pub fn node_result(&self, node_id: &str) -> Option<Value> {
        self.lock()
            .node_results
            .get(node_id)
            .map(|record| record.result.clone())
    }

    /// Merge the results of every prerequisite into one input map.
    ///
    /// Object results merge key-wise (later prerequisites win on key
    /// collisions); anything else lands under `input_<node_id>`.
    pub fn node_input(
        &self,
        node_id: &str,
        reverse_graph: &HashMap<NodeId, Vec<NodeId>>,
    ) -> HashMap<String, Value> {
        let inner = self.lock();
        let mut input = HashMap::new();
        let Some(deps) = reverse_graph.get(node_id) else {
            return input;
        };
        for dep in deps {
            let Some(record) = inner.node_results.get(dep) else {
                continue;
            };
            match &record.result {
                Value::Object(map) => {
                    for (key, value) in map {
                        input.insert(key.clone(), value.clone());
                    }
                }
                other => {
                    input.insert(format!("input_{dep}"), other.clone());
                }
            }
        }
        input
    }

    /// Whether a node is allowed to start right now: the run must be
    /// Running, the node not already Completed/Running, and every
    /// prerequisite Completed.
    pub fn can_execute(
        &self,
        node_id: &str,
        reverse_graph: &HashMap<NodeId, Vec<NodeId>>,
    ) -> bool {
        let inner = self.lock();
        if inner.status != ExecutionStatus::Running {
            return false;
        }
        let node_status = inner.node_status(node_id);
        if matches!(
            node_status,
            ExecutionStatus::Completed | ExecutionStatus::Running
        ) {
            return false;
        }
        reverse_graph
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .all(|dep| inner.node_status(dep) == ExecutionStatus::Completed)
    }

    /// Set a flow-scoped variable
    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        let mut inner = self.lock();
        let key = key.into();
        inner.variables.insert(key.clone(), value);
        inner.log_event("variable_set", json!({ "key": key }));
    }

    /// Read a flow-scoped variable
    pub fn variable(&self, key: &str) -> Option<Value> {
        self.lock().variables.get(key).cloned()
    }

    /// Snapshot of all flow variables
    pub fn variables(&self) -> HashMap<String, Value> {
        self.lock().variables.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        self.lock().metrics.clone()
    }

    /// The most recent log entries, newest last
    pub fn execution_log(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let inner = self.lock();
        let limit = limit.unwrap_or(inner.log.len()).min(inner.log.len());
        inner
            .log
            .iter()
            .skip(inner.log.len() - limit)
            .cloned()
            .collect()
    }

    /// Results of all nodes that have produced one
    pub fn node_results(&self) -> HashMap<NodeId, Value> {
        self.lock()
            .node_results
            .iter()
            .map(|(id, record)| (id.clone(), record.result.clone()))
            .collect()
    }

    /// Full snapshot of the run's state
    pub fn summary(&self) -> ExecutionSummary {
        let inner = self.lock();
        let mut counts = NodeCounts {
            total: inner.node_status.len(),
            ..NodeCounts::default()
        };
        for status in inner.node_status.values() {
            match status {
                ExecutionStatus::Pending => counts.pending += 1,
                ExecutionStatus::Running => counts.running += 1,
                ExecutionStatus::Completed => counts.completed += 1,
                ExecutionStatus::Failed => counts.failed += 1,
                _ => {}
            }
        }
        ExecutionSummary {
            execution_id: inner.execution_id.clone(),
            flow_id: inner.flow_id.clone(),
            status: inner.status,
            started_at: inner.started_at,
            completed_at: inner.completed_at,
            error_message: inner.error_message.clone(),
            node_counts: counts,
            metrics: inner.metrics.clone(),
            variables_count: inner.variables.len(),
            log_entries: inner.log.len(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ExecutionContext")
            .field("execution_id", &inner.execution_id)
            .field("flow_id", &inner.flow_id)
            .field("status", &inner.status)
            .finish()
    }
}
