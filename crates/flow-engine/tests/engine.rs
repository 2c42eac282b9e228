//! End-to-end engine tests: executor wiring, collaborator persistence,
//! pause/resume, and failure policy across a whole run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use flow_engine::{
    DependencyResolver, ExecutionContext, ExecutionObserver, ExecutionStatus,
    ExecutionStrategy, FlowDefinition, FlowEngineError, FlowEvent, FlowExecutor, FlowNode,
    MemoryBroadcastSink, MemoryRunStore, NodeId, NodeScheduler, Processor, ProcessorRegistry,
    Result, VecEventSink,
};

/// Counts invocations per node and echoes config + trigger variables.
struct CountingProcessor {
    node_id: String,
    value: Value,
    fail: bool,
    critical: bool,
    echo_variable: Option<String>,
    ctx: flow_engine::FlowContext,
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

#[async_trait]
impl Processor for CountingProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "counting"
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn execute(&mut self, _input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(self.node_id.clone())
            .or_insert(0) += 1;
        if self.fail {
            return Err(FlowEngineError::failed("configured to fail"));
        }
        let mut output = HashMap::new();
        output.insert("output".to_string(), self.value.clone());
        if let Some(key) = &self.echo_variable {
            output.insert(
                "echoed".to_string(),
                self.ctx.variable(key).unwrap_or(Value::Null),
            );
        }
        Ok(output)
    }
}

fn counting_registry(counts: Arc<Mutex<HashMap<String, usize>>>) -> Arc<ProcessorRegistry> {
    let mut registry = ProcessorRegistry::new();
    registry.register_fn("counting", move |node, ctx| {
        let flag = |key: &str| {
            node.config
                .get(key)
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        Ok(Box::new(CountingProcessor {
            node_id: node.id.clone(),
            value: node.config.get("value").cloned().unwrap_or(json!(1)),
            fail: flag("fail"),
            critical: flag("critical"),
            echo_variable: node
                .config
                .get("echoVariable")
                .and_then(Value::as_str)
                .map(str::to_string),
            ctx,
            counts: Arc::clone(&counts),
        }) as Box<dyn Processor>)
    });
    Arc::new(registry)
}

fn new_counts() -> Arc<Mutex<HashMap<String, usize>>> {
    Arc::new(Mutex::new(HashMap::new()))
}

/// RUST_LOG=debug surfaces engine logs when a test fails.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn end_to_end_run_persists_and_fans_out() {
    init_logging();
    let counts = new_counts();
    let run_store = Arc::new(MemoryRunStore::new());
    let broadcast = Arc::new(MemoryBroadcastSink::new());
    let events = Arc::new(VecEventSink::new());

    let definition = FlowDefinition::new("flow-e2e", "end to end")
        .with_node(FlowNode::new("a", "counting").with_config("value", json!(5)))
        .with_node(FlowNode::new("b", "counting"))
        .with_edge("a", "b");

    let executor = FlowExecutor::new(definition, counting_registry(Arc::clone(&counts)))
        .unwrap()
        .with_run_store(run_store.clone())
        .with_broadcast(broadcast.clone())
        .with_event_sink(events.clone());

    let result = executor.execute(None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.flow_id, "flow-e2e");
    assert_eq!(result.execution_summary.execution_id, result.run_id);
    assert_eq!(result.dependency_info.total_nodes, 2);
    assert_eq!(result.node_results["a"]["output"], json!(5));

    // run + node-run records persisted
    let record = run_store.run(&result.run_id).expect("run record");
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.node_runs.len(), 2);
    let node_run = &record.node_runs["a"];
    assert_eq!(node_run.status, ExecutionStatus::Completed);
    assert!(node_run.duration_ms.is_some());

    // every completed node was broadcast once
    let outputs = broadcast.node_outputs();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|(exec, _, _)| *exec == result.run_id));

    // lifecycle events bracket the node events
    let events = events.events();
    assert!(matches!(events.first(), Some(FlowEvent::ExecutionStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(FlowEvent::ExecutionCompleted { .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, FlowEvent::LevelCompleted { level: 1, .. })));

    // each node ran exactly once
    let counts = counts.lock().unwrap();
    assert_eq!(counts.get("a"), Some(&1));
    assert_eq!(counts.get("b"), Some(&1));
}

#[tokio::test]
async fn trigger_data_is_visible_as_flow_variables() {
    init_logging();
    let counts = new_counts();
    let definition = FlowDefinition::new("flow-trigger", "trigger").with_node(
        FlowNode::new("echo", "counting").with_config("echoVariable", json!("trigger_speed")),
    );
    let executor =
        FlowExecutor::new(definition, counting_registry(counts)).unwrap();

    let trigger: HashMap<String, Value> =
        [("speed".to_string(), json!(88))].into_iter().collect();
    let result = executor.execute(Some(trigger)).await.unwrap();
    assert_eq!(result.node_results["echo"]["echoed"], json!(88));
}

#[tokio::test]
async fn cyclic_flow_persists_a_failed_run() {
    init_logging();
    let counts = new_counts();
    let run_store = Arc::new(MemoryRunStore::new());
    let events = Arc::new(VecEventSink::new());

    let definition = FlowDefinition::new("flow-cycle", "cyclic")
        .with_node(FlowNode::new("a", "counting"))
        .with_node(FlowNode::new("b", "counting"))
        .with_edge("a", "b")
        .with_edge("b", "a");

    let executor = FlowExecutor::new(definition, counting_registry(Arc::clone(&counts)))
        .unwrap()
        .with_run_store(run_store.clone())
        .with_event_sink(events.clone());

    match executor.execute(None).await {
        Err(FlowEngineError::CircularDependency(path)) => assert!(!path.is_empty()),
        other => panic!("expected CircularDependency, got {:?}", other.map(|_| ())),
    }

    let run_id = run_store.run_ids().pop().expect("run created");
    let record = run_store.run(&run_id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.unwrap().contains("Circular dependency"));
    assert!(events
        .events()
        .iter()
        .any(|e| matches!(e, FlowEvent::ExecutionFailed { .. })));
    assert!(counts.lock().unwrap().is_empty(), "no node ever ran");
}

#[tokio::test]
async fn critical_failure_stops_run_through_the_executor() {
    init_logging();
    let counts = new_counts();
    let run_store = Arc::new(MemoryRunStore::new());

    let definition = FlowDefinition::new("flow-crit", "critical")
        .with_node(
            FlowNode::new("crit", "counting")
                .with_config("fail", json!(true))
                .with_config("critical", json!(true)),
        )
        .with_node(FlowNode::new("later", "counting"))
        .with_edge("crit", "later");

    let executor = FlowExecutor::new(definition, counting_registry(Arc::clone(&counts)))
        .unwrap()
        .with_run_store(run_store.clone());

    let result = executor.execute(None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.execution_summary.status, ExecutionStatus::Stopped);

    let record = run_store.run(&result.run_id).unwrap();
    assert_eq!(record.status, ExecutionStatus::Stopped);

    let report = executor.node_status("later").unwrap();
    assert_eq!(report.status, ExecutionStatus::Pending);
    assert!(!report.can_execute, "stopped run permits nothing");
    assert_eq!(counts.lock().unwrap().get("later"), None);
}

/// Pauses the run once, after the first level settles, and signals the
/// test when it has done so.
struct PauseAfterFirstLevel {
    context: ExecutionContext,
    paused: Notify,
    fired: AtomicBool,
}

#[async_trait]
impl ExecutionObserver for PauseAfterFirstLevel {
    async fn on_level_complete(&self, level: usize, _nodes: &[NodeId]) {
        if level == 0 && !self.fired.swap(true, Ordering::SeqCst) {
            self.context.pause();
            self.paused.notify_one();
        }
    }
}

#[tokio::test]
async fn pause_blocks_new_nodes_and_resume_runs_the_remainder() {
    init_logging();
    let counts = new_counts();
    let registry = counting_registry(Arc::clone(&counts));

    let nodes = vec![
        FlowNode::new("a1", "counting"),
        FlowNode::new("a2", "counting"),
        FlowNode::new("b1", "counting"),
        FlowNode::new("b2", "counting"),
    ];
    let edges = vec![
        flow_engine::FlowEdge::new("a1", "b1"),
        flow_engine::FlowEdge::new("a2", "b2"),
    ];
    let mut resolver = DependencyResolver::new(&nodes, &edges);
    let levels = resolver.resolve().unwrap();
    let context = ExecutionContext::new("flow-pause", None);

    let observer = Arc::new(PauseAfterFirstLevel {
        context: context.clone(),
        paused: Notify::new(),
        fired: AtomicBool::new(false),
    });
    let scheduler = NodeScheduler::new(
        levels,
        &nodes,
        resolver.reverse_graph().clone(),
        context.clone(),
        &registry,
    )
    .await
    .unwrap()
    .with_strategy(ExecutionStrategy::Sequential)
    .with_observer(observer.clone() as Arc<dyn ExecutionObserver>);

    let run = tokio::spawn(async move { scheduler.run().await });

    observer.paused.notified().await;
    // give the driver a chance to hit the pause gate
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(context.status(), ExecutionStatus::Paused);
    assert_eq!(context.node_status("a1"), ExecutionStatus::Completed);
    assert_eq!(context.node_status("b1"), ExecutionStatus::Pending);
    assert_eq!(context.node_status("b2"), ExecutionStatus::Pending);
    {
        let counts = counts.lock().unwrap();
        assert_eq!(counts.get("a1"), Some(&1));
        assert_eq!(counts.get("b1"), None, "paused run starts nothing new");
    }

    assert!(context.resume());
    let results = run.await.unwrap().unwrap();

    assert_eq!(results.execution_summary.status, ExecutionStatus::Completed);
    let counts = counts.lock().unwrap();
    for node in ["a1", "a2", "b1", "b2"] {
        assert_eq!(counts.get(node), Some(&1), "{node} ran exactly once");
    }
}

#[tokio::test]
async fn stop_mid_run_leaves_later_levels_untouched() {
    init_logging();
    let counts = new_counts();
    let registry = counting_registry(Arc::clone(&counts));

    let nodes = vec![FlowNode::new("a", "counting"), FlowNode::new("b", "counting")];
    let edges = vec![flow_engine::FlowEdge::new("a", "b")];
    let mut resolver = DependencyResolver::new(&nodes, &edges);
    let levels = resolver.resolve().unwrap();
    let context = ExecutionContext::new("flow-stop", None);

    struct StopAfterFirstLevel {
        context: ExecutionContext,
    }

    #[async_trait]
    impl ExecutionObserver for StopAfterFirstLevel {
        async fn on_level_complete(&self, level: usize, _nodes: &[NodeId]) {
            if level == 0 {
                self.context.stop("test stop");
            }
        }
    }

    let scheduler = NodeScheduler::new(
        levels,
        &nodes,
        resolver.reverse_graph().clone(),
        context.clone(),
        &registry,
    )
    .await
    .unwrap()
    .with_strategy(ExecutionStrategy::Sequential)
    .with_observer(Arc::new(StopAfterFirstLevel {
        context: context.clone(),
    }));

    let results = scheduler.run().await.unwrap();
    assert_eq!(results.execution_summary.status, ExecutionStatus::Stopped);
    assert_eq!(context.node_status("b"), ExecutionStatus::Pending);
    assert_eq!(counts.lock().unwrap().get("b"), None);
}
