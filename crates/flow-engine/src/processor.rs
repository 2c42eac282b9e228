//! Processor framework: the seam between the engine and node behavior
//!
//! Every node type is backed by a `Processor` built once per run by a
//! `ProcessorFactory`. Factories live in a `ProcessorRegistry` owned by
//! whoever assembles the engine; there is no process-wide registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{FlowEngineError, Result};
use crate::types::FlowNode;

/// Per-run seed handed to every processor at construction
#[derive(Clone)]
pub struct FlowContext {
    execution_id: String,
    flow_id: String,
    context: ExecutionContext,
}

impl FlowContext {
    pub fn new(context: &ExecutionContext) -> Self {
        Self {
            execution_id: context.execution_id(),
            flow_id: context.flow_id(),
            context: context.clone(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Set a flow-scoped variable shared by all nodes of this run
    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        self.context.set_variable(key, value);
    }

    /// Read a flow-scoped variable
    pub fn variable(&self, key: &str) -> Option<Value> {
        self.context.variable(key)
    }
}

/// A node's executable behavior for one run.
///
/// Configuration is parsed and validated at construction; `execute`
/// never re-inspects the node type tag.
#[async_trait]
pub trait Processor: Send {
    fn node_id(&self) -> &str;

    fn node_type(&self) -> &str;

    /// I/O-bound processors are eligible for the hybrid strategy's
    /// parallel batch within a level.
    fn is_io_bound(&self) -> bool {
        false
    }

    /// A failing critical processor stops the whole run.
    fn is_critical(&self) -> bool {
        false
    }

    /// Run the node against the merged input of its prerequisites.
    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>>;
}

/// Run a processor with timing and uniform error shaping.
///
/// Returns the output map and the elapsed wall time in milliseconds;
/// any processor error comes back as `ExecutionFailed` carrying the
/// original cause.
pub async fn safe_execute(
    processor: &mut dyn Processor,
    input: &HashMap<String, Value>,
) -> Result<(HashMap<String, Value>, f64)> {
    let node_id = processor.node_id().to_string();
    let node_type = processor.node_type().to_string();
    log::debug!("executing node {node_id} ({node_type})");
    let started = Instant::now();
    match processor.execute(input).await {
        Ok(output) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            log::info!("node {node_id} ({node_type}) completed in {elapsed_ms:.2}ms");
            Ok((output, elapsed_ms))
        }
        Err(err) => {
            log::error!("node {node_id} ({node_type}) failed: {err}");
            match err {
                FlowEngineError::ExecutionFailed(_) => Err(err),
                other => Err(FlowEngineError::failed(other.to_string())),
            }
        }
    }
}

/// Builds a processor for one node of a flow.
///
/// Validation belongs here: a flow with a bad node config must fail
/// before anything is scheduled.
#[async_trait]
pub trait ProcessorFactory: Send + Sync {
    async fn create(&self, node: &FlowNode, ctx: FlowContext) -> Result<Box<dyn Processor>>;
}

/// Factory backed by a plain function (for processors whose
/// construction needs no I/O)
struct FnProcessorFactory<F> {
    build: F,
}

#[async_trait]
impl<F> ProcessorFactory for FnProcessorFactory<F>
where
    F: Fn(&FlowNode, FlowContext) -> Result<Box<dyn Processor>> + Send + Sync,
{
    async fn create(&self, node: &FlowNode, ctx: FlowContext) -> Result<Box<dyn Processor>> {
        (self.build)(node, ctx)
    }
}

/// Registry mapping node type tags to processor factories.
///
/// Owned by the embedder; pass it explicitly to executors. Merge
/// registries to compose node libraries.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, Arc<dyn ProcessorFactory>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a node type (replaces any existing one)
    pub fn register(&mut self, node_type: impl Into<String>, factory: Arc<dyn ProcessorFactory>) {
        let node_type = node_type.into();
        log::debug!("registering processor factory for '{node_type}'");
        self.factories.insert(node_type, factory);
    }

    /// Register a plain constructor function as a factory
    pub fn register_fn<F>(&mut self, node_type: impl Into<String>, build: F)
    where
        F: Fn(&FlowNode, FlowContext) -> Result<Box<dyn Processor>> + Send + Sync + 'static,
    {
        self.register(node_type, Arc::new(FnProcessorFactory { build }));
    }

    /// Remove a factory, returning whether one was present
    pub fn unregister(&mut self, node_type: &str) -> bool {
        self.factories.remove(node_type).is_some()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn ProcessorFactory>> {
        self.factories.get(node_type).cloned()
    }

    /// All registered type tags, sorted
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Absorb another registry (its entries win on collisions)
    pub fn merge(&mut self, other: ProcessorRegistry) {
        for (node_type, factory) in other.factories {
            self.factories.insert(node_type, factory);
        }
    }

    /// Build the processor for a node, failing on unknown type tags
    pub async fn create(&self, node: &FlowNode, ctx: FlowContext) -> Result<Box<dyn Processor>> {
        let factory = self
            .get(&node.node_type)
            .ok_or_else(|| FlowEngineError::UnknownNodeType(node.node_type.clone()))?;
        factory.create(node, ctx).await
    }
}
