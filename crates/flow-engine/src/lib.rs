//! Flow Engine - Dependency-resolved flow execution for Edgeflow
//!
//! This crate turns a flow definition (typed nodes + directed edges)
//! into a levelled execution plan and drives it to completion. It
//! supports:
//!
//! - Cycle detection with a reported cyclic path
//! - Topological execution levels (all nodes of a level may run
//!   concurrently)
//! - Sequential, parallel, and hybrid scheduling strategies with a
//!   bounded worker pool
//! - A concurrency-safe per-run execution context (statuses, results,
//!   flow variables, log, metrics)
//! - Pause / resume / stop of a run in flight
//!
//! # Architecture
//!
//! Node behavior lives behind the `Processor` trait, built per run by
//! `ProcessorFactory` implementations held in an owned
//! `ProcessorRegistry`. External concerns (persistence, live fan-out,
//! device access) sit behind the collaborator traits in
//! [`collaborators`]; the engine ships null and in-memory
//! implementations so it runs standalone.
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{FlowDefinition, FlowExecutor, FlowNode, ProcessorRegistry};
//!
//! let definition = FlowDefinition::new("demo", "Demo flow")
//!     .with_node(FlowNode::new("in", "slider"))
//!     .with_node(FlowNode::new("out", "display"))
//!     .with_edge("in", "out");
//! let executor = FlowExecutor::new(definition, registry)?;
//! let result = executor.execute(None).await?;
//! ```

pub mod collaborators;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod processor;
pub mod resolver;
pub mod scheduler;
pub mod types;

// Re-export key types
pub use collaborators::{
    BroadcastSink, DeviceGateway, DeviceInfo, DeviceReading, MemoryBroadcastSink,
    MemoryRunStore, NullBroadcastSink, NullDeviceGateway, NullRunStore, RunStore,
};
pub use context::{ExecutionContext, ExecutionStatus, ExecutionSummary};
pub use error::{FlowEngineError, Result};
pub use events::{EventSink, FlowEvent, NullEventSink, VecEventSink};
pub use executor::{FlowExecutor, FlowRunResult, FlowStatus, NodeStatusReport};
pub use processor::{safe_execute, FlowContext, Processor, ProcessorFactory, ProcessorRegistry};
pub use resolver::{DependencyResolver, DependencySummary, ParallelismReport};
pub use scheduler::{ExecutionObserver, ExecutionStrategy, NodeScheduler, SchedulerResults};
pub use types::{FlowDefinition, FlowEdge, FlowNode, NodeId, NodeRecord};
