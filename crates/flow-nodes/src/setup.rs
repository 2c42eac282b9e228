//! Registry assembly for the builtin node library
//!
//! `builtin_registry` wires every node type this crate ships into a
//! fresh [`ProcessorRegistry`]; `register_builtins` does the same into
//! a registry you already own, so embedders can layer their own node
//! types on top.

use std::sync::Arc;

use flow_engine::{
    BroadcastSink, DeviceGateway, NullBroadcastSink, NullDeviceGateway, Processor,
    ProcessorRegistry,
};

use crate::device::DeviceProcessorFactory;
use crate::function::CustomFunctionProcessor;
use crate::input::{ButtonProcessor, NumberInputProcessor, SliderProcessor, TextInputProcessor};
use crate::output::{AnalogOutputProcessor, DigitalOutputProcessor, DisplayProcessor};
use crate::passthrough::{CommentProcessor, DebugProcessor};
use crate::transform::{MinMaxProcessor, MovingAverageProcessor};

/// External services the builtin nodes depend on. Defaults to the null
/// collaborators, which makes every node except `device` fully
/// functional offline.
#[derive(Clone)]
pub struct NodeRuntime {
    pub gateway: Arc<dyn DeviceGateway>,
    pub broadcast: Arc<dyn BroadcastSink>,
}

impl Default for NodeRuntime {
    fn default() -> Self {
        Self {
            gateway: Arc::new(NullDeviceGateway),
            broadcast: Arc::new(NullBroadcastSink),
        }
    }
}

impl NodeRuntime {
    pub fn new(gateway: Arc<dyn DeviceGateway>, broadcast: Arc<dyn BroadcastSink>) -> Self {
        Self { gateway, broadcast }
    }
}

/// Register every builtin node type into `registry`
pub fn register_builtins(registry: &mut ProcessorRegistry, runtime: NodeRuntime) {
    registry.register_fn("button", |node, ctx| {
        Ok(Box::new(ButtonProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });
    registry.register_fn("slider", |node, ctx| {
        Ok(Box::new(SliderProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });
    registry.register_fn("text-input", |node, ctx| {
        Ok(Box::new(TextInputProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });
    registry.register_fn("number-input", |node, ctx| {
        Ok(Box::new(NumberInputProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });

    let broadcast = Arc::clone(&runtime.broadcast);
    registry.register_fn("digital-output", move |node, ctx| {
        Ok(Box::new(DigitalOutputProcessor::from_node(
            node,
            ctx,
            Arc::clone(&broadcast),
        )?) as Box<dyn Processor>)
    });
    let broadcast = Arc::clone(&runtime.broadcast);
    registry.register_fn("analog-output", move |node, ctx| {
        Ok(Box::new(AnalogOutputProcessor::from_node(
            node,
            ctx,
            Arc::clone(&broadcast),
        )?) as Box<dyn Processor>)
    });
    let broadcast = Arc::clone(&runtime.broadcast);
    registry.register_fn("display", move |node, ctx| {
        Ok(Box::new(DisplayProcessor::from_node(
            node,
            ctx,
            Arc::clone(&broadcast),
        )?) as Box<dyn Processor>)
    });

    registry.register_fn("moving-average", |node, ctx| {
        Ok(Box::new(MovingAverageProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });
    registry.register_fn("min-max", |node, ctx| {
        Ok(Box::new(MinMaxProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });

    registry.register_fn("comment", |node, ctx| {
        Ok(Box::new(CommentProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });
    registry.register_fn("debug", |node, ctx| {
        Ok(Box::new(DebugProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });

    registry.register_fn("custom-function", |node, ctx| {
        Ok(Box::new(CustomFunctionProcessor::from_node(node, ctx)?) as Box<dyn Processor>)
    });
    registry.register(
        "device",
        Arc::new(DeviceProcessorFactory::new(Arc::clone(&runtime.gateway))),
    );
}

/// A registry holding exactly the builtin node library
pub fn builtin_registry(runtime: NodeRuntime) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    register_builtins(&mut registry, runtime);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_every_node_type() {
        let registry = builtin_registry(NodeRuntime::default());
        assert_eq!(
            registry.node_types(),
            vec![
                "analog-output",
                "button",
                "comment",
                "custom-function",
                "debug",
                "device",
                "digital-output",
                "display",
                "min-max",
                "moving-average",
                "number-input",
                "slider",
                "text-input",
            ]
        );
    }

    #[test]
    fn builtins_compose_with_embedder_registries() {
        let mut registry = ProcessorRegistry::new();
        register_builtins(&mut registry, NodeRuntime::default());
        assert!(registry.contains("slider"));
        assert!(registry.unregister("device"));
        assert!(!registry.contains("device"));
    }
}
