//! Level-by-level node scheduling
//!
//! The scheduler drives one run of a resolved flow: it walks the
//! execution levels in order, runs the nodes of each level under the
//! selected strategy, and never lets a node start before all of its
//! prerequisites completed. Levels are hard barriers; pause and stop
//! requests are honored at level boundaries and before every
//! sequentially-executed node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use crate::context::{ExecutionContext, ExecutionStatus, ExecutionSummary, LogEntry};
use crate::error::{FlowEngineError, Result};
use crate::processor::{safe_execute, FlowContext, Processor, ProcessorRegistry};
use crate::types::{FlowNode, NodeId};

const DEFAULT_MAX_WORKERS: usize = 4;
const PAUSE_POLL: Duration = Duration::from_millis(25);

/// How the nodes within a level are driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One node at a time, in level order
    Sequential,
    /// Whole level concurrently, bounded by `max_workers`
    Parallel,
    /// I/O-bound nodes of a level concurrently, the rest sequentially
    #[default]
    Hybrid,
}

/// Callbacks fired as the scheduler makes progress.
///
/// All methods default to no-ops; implement only what you need. The
/// level callback fires after every node callback of that level.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_node_start(&self, _node_id: &str) {}

    async fn on_node_complete(&self, _node_id: &str, _result: &HashMap<String, Value>) {}

    async fn on_node_error(&self, _node_id: &str, _error: &FlowEngineError) {}

    async fn on_level_complete(&self, _level: usize, _nodes: &[NodeId]) {}
}

struct NoopObserver;

#[async_trait]
impl ExecutionObserver for NoopObserver {}

/// What a finished (or stopped) run hands back
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerResults {
    pub execution_summary: ExecutionSummary,
    pub node_results: HashMap<NodeId, Value>,
    pub variables: HashMap<String, Value>,
    pub execution_log: Vec<LogEntry>,
}

struct SchedulerShared {
    context: ExecutionContext,
    reverse_graph: HashMap<NodeId, Vec<NodeId>>,
    processors: HashMap<NodeId, AsyncMutex<Box<dyn Processor>>>,
}

/// Drives one run of a resolved flow
pub struct NodeScheduler {
    levels: Vec<Vec<NodeId>>,
    strategy: ExecutionStrategy,
    max_workers: usize,
    io_bound: HashMap<NodeId, bool>,
    observer: Arc<dyn ExecutionObserver>,
    shared: Arc<SchedulerShared>,
}

impl NodeScheduler {
    /// Build a scheduler, constructing one processor per node through
    /// the registry. Any factory error (bad config, unknown type,
    /// unresolvable device) aborts construction.
    pub async fn new(
        levels: Vec<Vec<NodeId>>,
        nodes: &[FlowNode],
        reverse_graph: HashMap<NodeId, Vec<NodeId>>,
        context: ExecutionContext,
        registry: &ProcessorRegistry,
    ) -> Result<Self> {
        let flow_ctx = FlowContext::new(&context);
        let mut processors = HashMap::new();
        let mut io_bound = HashMap::new();
        for node in nodes {
            let processor = registry.create(node, flow_ctx.clone()).await?;
            io_bound.insert(node.id.clone(), processor.is_io_bound());
            processors.insert(node.id.clone(), AsyncMutex::new(processor));
        }
        Ok(Self {
            levels,
            strategy: ExecutionStrategy::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            io_bound,
            observer: Arc::new(NoopObserver),
            shared: Arc::new(SchedulerShared {
                context,
                reverse_graph,
                processors,
            }),
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

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.shared.context
    }

    pub fn pause(&self) -> bool {
        self.shared.context.pause()
    }

    pub fn resume(&self) -> bool {
        self.shared.context.resume()
    }

    pub fn stop(&self, reason: impl Into<String>) -> bool {
        self.shared.context.stop(reason)
    }

    /// Run the flow to a terminal state.
    ///
    /// Per-node failures are recorded in the context and do not abort
    /// the run unless the node is critical; a panicking node task stops
    /// the run and surfaces as an error.
    pub async fn run(&self) -> Result<SchedulerResults> {
        let node_count: usize = self.levels.iter().map(Vec::len).sum();
        log::info!(
            "scheduling {} nodes across {} levels with {:?} strategy",
            node_count,
            self.levels.len(),
            self.strategy
        );
        self.shared.context.start();

        let outcome = match self.strategy {
            ExecutionStrategy::Sequential => self.run_sequential().await,
            ExecutionStrategy::Parallel => self.run_parallel().await,
            ExecutionStrategy::Hybrid => self.run_hybrid().await,
        };

        match outcome {
            Ok(()) => {
                self.shared.context.complete(true, None);
                Ok(self.results())
            }
            Err(err) => {
                self.shared.context.complete(false, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Snapshot of the run's outputs and state
    pub fn results(&self) -> SchedulerResults {
        SchedulerResults {
            execution_summary: self.shared.context.summary(),
            node_results: self.shared.context.node_results(),
            variables: self.shared.context.variables(),
            execution_log: self.shared.context.execution_log(Some(100)),
        }
    }

    /// Block while paused; false once the run is no longer drivable
    async fn wait_for_runnable(&self) -> bool {
        loop {
            match self.shared.context.status() {
                ExecutionStatus::Running => return true,
                ExecutionStatus::Paused => tokio::time::sleep(PAUSE_POLL).await,
                _ => return false,
            }
        }
    }

    async fn run_sequential(&self) -> Result<()> {
        for (idx, level) in self.levels.iter().enumerate() {
            log::debug!("level {idx}: running {} nodes sequentially", level.len());
            for node_id in level {
                if !self.wait_for_runnable().await {
                    return Ok(());
                }
                self.run_node_guarded(node_id).await?;
            }
            self.observer.on_level_complete(idx, level).await;
        }
        Ok(())
    }

    async fn run_parallel(&self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        for (idx, level) in self.levels.iter().enumerate() {
            if !self.wait_for_runnable().await {
                return Ok(());
            }
            log::debug!("level {idx}: running {} nodes in parallel", level.len());
            self.run_nodes_parallel(level, &semaphore).await?;
            self.observer.on_level_complete(idx, level).await;
        }
        Ok(())
    }

    async fn run_hybrid(&self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        for (idx, level) in self.levels.iter().enumerate() {
            if !self.wait_for_runnable().await {
                return Ok(());
            }
            let (io_nodes, cpu_nodes): (Vec<NodeId>, Vec<NodeId>) = level
                .iter()
                .cloned()
                .partition(|id| self.io_bound.get(id).copied().unwrap_or(false));
            log::debug!(
                "level {idx}: {} I/O-bound nodes in parallel, {} sequential",
                io_nodes.len(),
                cpu_nodes.len()
            );
            if !io_nodes.is_empty() {
                self.run_nodes_parallel(&io_nodes, &semaphore).await?;
            }
            for node_id in &cpu_nodes {
                if !self.wait_for_runnable().await {
                    return Ok(());
                }
                self.run_node_guarded(node_id).await?;
            }
            self.observer.on_level_complete(idx, level).await;
        }
        Ok(())
    }

    /// Run one node on its own task so a panicking processor is caught
    /// as a `JoinError` and stops the run, matching the parallel path.
    async fn run_node_guarded(&self, node_id: &NodeId) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let observer = Arc::clone(&self.observer);
        let node_id = node_id.clone();
        let task = tokio::spawn(async move {
            execute_single_node(&shared, observer.as_ref(), &node_id).await;
        });
        if let Err(err) = task.await {
            log::error!("node task aborted unexpectedly: {err}");
            let err = FlowEngineError::failed(format!("node task aborted unexpectedly: {err}"));
            self.shared.context.stop(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Spawn a batch of nodes and wait for all of them (the barrier).
    /// The semaphore bounds how many run at once.
    async fn run_nodes_parallel(
        &self,
        nodes: &[NodeId],
        semaphore: &Arc<Semaphore>,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();
        for node_id in nodes {
            let shared = Arc::clone(&self.shared);
            let observer = Arc::clone(&self.observer);
            let semaphore = Arc::clone(semaphore);
            let node_id = node_id.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                execute_single_node(&shared, observer.as_ref(), &node_id).await;
            });
        }

        let mut panic_error: Option<FlowEngineError> = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                log::error!("node task aborted unexpectedly: {err}");
                if panic_error.is_none() {
                    panic_error = Some(FlowEngineError::failed(format!(
                        "node task aborted unexpectedly: {err}"
                    )));
                }
            }
        }

        if let Some(err) = panic_error {
            self.shared.context.stop(err.to_string());
            return Err(err);
        }
        Ok(())
    }
}

/// Run one node through its full lifecycle. Failures are recorded in
/// the context rather than returned: a failed non-critical node must
/// not disturb its siblings.
async fn execute_single_node(
    shared: &SchedulerShared,
    observer: &dyn ExecutionObserver,
    node_id: &str,
) {
    let Some(cell) = shared.processors.get(node_id) else {
        log::error!("no processor constructed for node {node_id}");
        return;
    };
    if !shared.context.can_execute(node_id, &shared.reverse_graph) {
        log::debug!("node {node_id} is not runnable; skipping");
        return;
    }

    shared.context.set_node_status(node_id, ExecutionStatus::Running);
    observer.on_node_start(node_id).await;
    let input = shared.context.node_input(node_id, &shared.reverse_graph);

    let mut processor = cell.lock().await;
    let node_type = processor.node_type().to_string();
    let critical = processor.is_critical();

    match safe_execute(processor.as_mut(), &input).await {
        Ok((mut output, elapsed_ms)) => {
            output.insert("execution_time_ms".to_string(), json!(elapsed_ms));
            output.insert("node_id".to_string(), json!(node_id));
            output.insert("node_type".to_string(), json!(node_type));
            let stored: serde_json::Map<String, Value> = output.clone().into_iter().collect();
            shared.context.set_node_result(node_id, Value::Object(stored));
            shared
                .context
                .set_node_status(node_id, ExecutionStatus::Completed);
            observer.on_node_complete(node_id, &output).await;
        }
        Err(err) => {
            shared.context.set_node_result(
                node_id,
                json!({
                    "error": err.to_string(),
                    "node_id": node_id,
                    "node_type": node_type,
                }),
            );
            shared
                .context
                .set_node_status(node_id, ExecutionStatus::Failed);
            observer.on_node_error(node_id, &err).await;
            if critical {
                shared.context.stop(format!(
                    "critical node '{node_id}' ({node_type}) failed: {err}"
                ));
            }
        }
    }
}
