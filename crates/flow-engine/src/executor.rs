//! Flow executor: the single entry point for running a flow
//!
//! Wires together the resolver, registry, scheduler, and external
//! collaborators, persists run/node-run records, fans node outputs out
//! through the broadcast sink, and forwards progress events to the
//! caller-supplied sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::collaborators::{BroadcastSink, NullBroadcastSink, NullRunStore, RunStore};
use crate::context::{ExecutionContext, ExecutionStatus, ExecutionSummary};
use crate::error::{FlowEngineError, Result};
use crate::events::{EventSink, FlowEvent, NullEventSink};
use crate::processor::ProcessorRegistry;
use crate::resolver::{DependencyResolver, DependencySummary};
use crate::scheduler::{ExecutionObserver, ExecutionStrategy, NodeScheduler};
use crate::types::{FlowDefinition, NodeId};

/// Terminal payload of one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRunResult {
    pub success: bool,
    pub run_id: String,
    pub flow_id: String,
    pub node_results: HashMap<NodeId, Value>,
    pub execution_summary: ExecutionSummary,
    pub dependency_info: DependencySummary,
}

/// Combined view of a run in flight (or just finished)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    pub execution: Option<ExecutionSummary>,
    pub dependencies: Option<DependencySummary>,
}

/// Point-in-time view of one node within the current run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusReport {
    pub node_id: NodeId,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub can_execute: bool,
}

#[derive(Default)]
struct ExecutorState {
    context: Option<ExecutionContext>,
    dependency_summary: Option<DependencySummary>,
    reverse_graph: Option<HashMap<NodeId, Vec<NodeId>>>,
}

/// Orchestrates runs of one flow definition
pub struct FlowExecutor {
    definition: FlowDefinition,
    registry: Arc<ProcessorRegistry>,
    strategy: ExecutionStrategy,
    max_workers: usize,
    run_store: Arc<dyn RunStore>,
    broadcast: Arc<dyn BroadcastSink>,
    event_sink: Arc<dyn EventSink>,
    state: Mutex<ExecutorState>,
}

impl FlowExecutor {
    /// Create an executor; rejects definitions without nodes.
    pub fn new(definition: FlowDefinition, registry: Arc<ProcessorRegistry>) -> Result<Self> {
        if definition.nodes.is_empty() {
            return Err(FlowEngineError::InvalidDefinition(format!(
                "flow '{}' has no nodes",
                definition.id
            )));
        }
        Ok(Self {
            definition,
            registry,
            strategy: ExecutionStrategy::default(),
            max_workers: 4,
            run_store: Arc::new(NullRunStore),
            broadcast: Arc::new(NullBroadcastSink),
            event_sink: Arc::new(NullEventSink),
            state: Mutex::new(ExecutorState::default()),
        })
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_run_store(mut self, run_store: Arc<dyn RunStore>) -> Self {
        self.run_store = run_store;
        self
    }

    pub fn with_broadcast(mut self, broadcast: Arc<dyn BroadcastSink>) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Build-and-run convenience for one-shot execution
    pub async fn create_and_execute(
        definition: FlowDefinition,
        registry: Arc<ProcessorRegistry>,
        trigger: Option<HashMap<String, Value>>,
        strategy: Option<ExecutionStrategy>,
        max_workers: Option<usize>,
    ) -> Result<FlowRunResult> {
        let mut executor = Self::new(definition, registry)?;
        if let Some(strategy) = strategy {
            executor = executor.with_strategy(strategy);
        }
        if let Some(max_workers) = max_workers {
            executor = executor.with_max_workers(max_workers);
        }
        executor.execute(trigger).await
    }

    /// Run the flow once.
    ///
    /// Trigger data is exposed to processors as `trigger_<key>` flow
    /// variables. Any failure is classified, persisted against the run
    /// record, and surfaced as a single `FlowEngineError`.
    pub async fn execute(
        &self,
        trigger: Option<HashMap<String, Value>>,
    ) -> Result<FlowRunResult> {
        let run_id = self.run_store.create_run(&self.definition.id).await?;
        let context = ExecutionContext::new(self.definition.id.clone(), Some(run_id.clone()));
        self.lock_state().context = Some(context.clone());

        log::info!(
            "executing flow '{}' as run {run_id} ({:?}, {} workers)",
            self.definition.id,
            self.strategy,
            self.max_workers
        );
        self.emit(FlowEvent::ExecutionStarted {
            flow_id: self.definition.id.clone(),
            execution_id: run_id.clone(),
        });

        if let Some(trigger) = trigger {
            for (key, value) in trigger {
                context.set_variable(format!("trigger_{key}"), value);
            }
        }

        let mut resolver =
            DependencyResolver::new(&self.definition.nodes, &self.definition.edges);
        let levels = match resolver.resolve() {
            Ok(levels) => levels,
            Err(err) => return self.fail_run(&run_id, &context, err).await,
        };
        let dependency_info = resolver.summary();
        {
            let mut state = self.lock_state();
            state.dependency_summary = Some(dependency_info.clone());
            state.reverse_graph = Some(resolver.reverse_graph().clone());
        }

        let observer = Arc::new(RunObserver {
            run_id: run_id.clone(),
            run_store: Arc::clone(&self.run_store),
            broadcast: Arc::clone(&self.broadcast),
            event_sink: Arc::clone(&self.event_sink),
        });
        let scheduler = match NodeScheduler::new(
            levels,
            &self.definition.nodes,
            resolver.reverse_graph().clone(),
            context.clone(),
            &self.registry,
        )
        .await
        {
            Ok(scheduler) => scheduler
                .with_strategy(self.strategy)
                .with_max_workers(self.max_workers)
                .with_observer(observer),
            Err(err) => return self.fail_run(&run_id, &context, err).await,
        };

        let results = match scheduler.run().await {
            Ok(results) => results,
            Err(err) => return self.fail_run(&run_id, &context, err).await,
        };

        let status = context.status();
        let success = status == ExecutionStatus::Completed;
        let stored_result = json!({
            "executionSummary": serde_json::to_value(&results.execution_summary)
                .unwrap_or(Value::Null),
            "dependencyInfo": serde_json::to_value(&dependency_info).unwrap_or(Value::Null),
        });
        if let Err(store_err) = self
            .run_store
            .update_run(&run_id, status, Some(stored_result), context.error_message())
            .await
        {
            log::warn!("failed to persist terminal record for run {run_id}: {store_err}");
        }
        self.emit(FlowEvent::ExecutionCompleted {
            flow_id: self.definition.id.clone(),
            execution_id: run_id.clone(),
            status: status.to_string(),
        });

        Ok(FlowRunResult {
            success,
            run_id,
            flow_id: self.definition.id.clone(),
            node_results: results.node_results,
            execution_summary: results.execution_summary,
            dependency_info,
        })
    }

    /// Pause the current run; false when nothing is running
    pub fn pause(&self) -> bool {
        self.lock_state()
            .context
            .as_ref()
            .map(ExecutionContext::pause)
            .unwrap_or(false)
    }

    /// Resume a paused run
    pub fn resume(&self) -> bool {
        self.lock_state()
            .context
            .as_ref()
            .map(ExecutionContext::resume)
            .unwrap_or(false)
    }

    /// Stop the current run
    pub fn stop(&self, reason: impl Into<String>) -> bool {
        self.lock_state()
            .context
            .as_ref()
            .map(|ctx| ctx.stop(reason.into()))
            .unwrap_or(false)
    }

    /// Execution summary merged with the dependency summary
    pub fn status(&self) -> FlowStatus {
        let state = self.lock_state();
        FlowStatus {
            execution: state.context.as_ref().map(ExecutionContext::summary),
            dependencies: state.dependency_summary.clone(),
        }
    }

    /// Status, result, and runnability of one node
    pub fn node_status(&self, node_id: &str) -> Option<NodeStatusReport> {
        if self.definition.find_node(node_id).is_none() {
            return None;
        }
        let state = self.lock_state();
        let context = state.context.as_ref()?;
        let can_execute = state
            .reverse_graph
            .as_ref()
            .map(|graph| context.can_execute(node_id, graph))
            .unwrap_or(false);
        Some(NodeStatusReport {
            node_id: node_id.to_string(),
            status: context.node_status(node_id),
            result: context.node_result(node_id),
            can_execute,
        })
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: FlowEvent) {
        if let Err(err) = self.event_sink.send(event) {
            log::warn!("dropping flow event: {err}");
        }
    }

    async fn fail_run(
        &self,
        run_id: &str,
        context: &ExecutionContext,
        err: FlowEngineError,
    ) -> Result<FlowRunResult> {
        log::error!(
            "flow '{}' run {run_id} failed: {err}",
            self.definition.id
        );
        if !context.is_finished() {
            context.complete(false, Some(err.to_string()));
        }
        if let Err(store_err) = self
            .run_store
            .update_run(run_id, context.status(), None, Some(err.to_string()))
            .await
        {
            log::warn!("failed to persist failure for run {run_id}: {store_err}");
        }
        self.emit(FlowEvent::ExecutionFailed {
            flow_id: self.definition.id.clone(),
            execution_id: run_id.to_string(),
            error: err.to_string(),
        });
        Err(err)
    }
}

/// Scheduler observer that persists node-run records, fans outputs out,
/// and forwards progress events. Collaborator failures are logged and
/// swallowed: notification is one-way and must not disturb the run.
struct RunObserver {
    run_id: String,
    run_store: Arc<dyn RunStore>,
    broadcast: Arc<dyn BroadcastSink>,
    event_sink: Arc<dyn EventSink>,
}

impl RunObserver {
    fn emit(&self, event: FlowEvent) {
        if let Err(err) = self.event_sink.send(event) {
            log::warn!("dropping flow event: {err}");
        }
    }
}

#[async_trait]
impl ExecutionObserver for RunObserver {
    async fn on_node_start(&self, node_id: &str) {
        if let Err(err) = self.run_store.create_node_run(&self.run_id, node_id).await {
            log::warn!("failed to create node-run record for {node_id}: {err}");
        }
        self.emit(FlowEvent::NodeStarted {
            node_id: node_id.to_string(),
            execution_id: self.run_id.clone(),
        });
    }

    async fn on_node_complete(&self, node_id: &str, result: &HashMap<String, Value>) {
        let output: Value = Value::Object(result.clone().into_iter().collect());
        let duration_ms = result.get("execution_time_ms").and_then(Value::as_f64);
        if let Err(err) = self
            .run_store
            .update_node_run(
                &self.run_id,
                node_id,
                ExecutionStatus::Completed,
                Some(output.clone()),
                duration_ms,
            )
            .await
        {
            log::warn!("failed to update node-run record for {node_id}: {err}");
        }
        if let Err(err) = self
            .broadcast
            .publish_node_output(&self.run_id, node_id, &output)
            .await
        {
            log::warn!("failed to broadcast output of {node_id}: {err}");
        }
        self.emit(FlowEvent::NodeCompleted {
            node_id: node_id.to_string(),
            execution_id: self.run_id.clone(),
            output: Some(output),
        });
    }

    async fn on_node_error(&self, node_id: &str, error: &FlowEngineError) {
        if let Err(err) = self
            .run_store
            .update_node_run(
                &self.run_id,
                node_id,
                ExecutionStatus::Failed,
                Some(json!({ "error": error.to_string() })),
                None,
            )
            .await
        {
            log::warn!("failed to record failure of {node_id}: {err}");
        }
        self.emit(FlowEvent::NodeFailed {
            node_id: node_id.to_string(),
            execution_id: self.run_id.clone(),
            error: error.to_string(),
        });
    }

    async fn on_level_complete(&self, level: usize, nodes: &[NodeId]) {
        log::debug!("level {level} complete: {nodes:?}");
        self.emit(FlowEvent::LevelCompleted {
            execution_id: self.run_id.clone(),
            level,
            nodes: nodes.to_vec(),
        });
    }
}
