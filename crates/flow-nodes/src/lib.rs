//! Builtin node library for the flow engine
//!
//! Thirteen node types covering interactive inputs (button, slider,
//! text-input, number-input), hardware-facing outputs (digital-output,
//! analog-output, display), transforms (moving-average, min-max),
//! passthroughs (comment, debug), user-defined Lua functions
//! (custom-function), and device I/O (device).
//!
//! ```no_run
//! use flow_nodes::{builtin_registry, NodeRuntime};
//!
//! let registry = builtin_registry(NodeRuntime::default());
//! assert!(registry.contains("slider"));
//! ```

pub mod device;
pub mod function;
pub mod input;
pub mod output;
pub mod passthrough;
mod props;
pub mod setup;
pub mod transform;

pub use device::{DeviceProcessor, DeviceProcessorFactory};
pub use function::CustomFunctionProcessor;
pub use input::{ButtonProcessor, NumberInputProcessor, SliderProcessor, TextInputProcessor};
pub use output::{AnalogOutputProcessor, DigitalOutputProcessor, DisplayProcessor};
pub use passthrough::{CommentProcessor, DebugProcessor};
pub use setup::{builtin_registry, register_builtins, NodeRuntime};
pub use transform::{MinMaxProcessor, MovingAverageProcessor};
