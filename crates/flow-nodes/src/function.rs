//! User-defined function nodes backed by an embedded Lua interpreter.
//!
//! The sandbox is capability-scoped rather than filtered: the VM is
//! created with only the math/string/table parts of the standard
//! library, so there is no `os`, `io`, or `require` surface to abuse.
//! Runaway scripts are cut off by an instruction-count hook.
//!
//! Contract: the merged input map is exposed as the global `input`, and
//! the script must leave its result in the global `result`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mlua::{HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, VmState};
use serde_json::{json, Value};

use flow_engine::{FlowContext, FlowEngineError, FlowNode, Processor, Result};

use crate::props::str_prop;

/// Upper bound on script size, in bytes
const MAX_CODE_BYTES: usize = 64 * 1024;
/// Total VM instructions a single execution may spend
const INSTRUCTION_BUDGET: u64 = 1_000_000;
/// How often the budget hook fires
const HOOK_INTERVAL: u32 = 1000;

/// Runs operator-supplied Lua against the node's merged input
pub struct CustomFunctionProcessor {
    node_id: String,
    code: String,
}

impl CustomFunctionProcessor {
    pub fn from_node(node: &FlowNode, _ctx: FlowContext) -> Result<Self> {
        let code = str_prop(&node.config, "code").unwrap_or_default();
        if code.trim().is_empty() {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                "function code must not be empty",
            ));
        }
        if code.len() > MAX_CODE_BYTES {
            return Err(FlowEngineError::invalid_config(
                &node.id,
                format!(
                    "function code exceeds {MAX_CODE_BYTES} bytes ({} given)",
                    code.len()
                ),
            ));
        }
        // Parse eagerly so syntax errors surface at validation time,
        // not mid-run.
        let lua = sandbox().map_err(|err| {
            FlowEngineError::invalid_config(&node.id, format!("sandbox setup failed: {err}"))
        })?;
        lua.load(code.as_str())
            .set_name(format!("node:{}", node.id))
            .into_function()
            .map_err(|err| {
                FlowEngineError::invalid_config(&node.id, format!("invalid Lua: {err}"))
            })?;
        Ok(Self {
            node_id: node.id.clone(),
            code,
        })
    }
}

/// A fresh VM with only math/string/table loaded
fn sandbox() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::MATH | StdLib::STRING | StdLib::TABLE,
        LuaOptions::default(),
    )
}

fn arm_budget_hook(lua: &Lua) {
    let spent = Arc::new(AtomicU64::new(0));
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            let total = spent.fetch_add(HOOK_INTERVAL as u64, Ordering::Relaxed)
                + HOOK_INTERVAL as u64;
            if total > INSTRUCTION_BUDGET {
                Err(mlua::Error::RuntimeError(
                    "instruction budget exceeded".to_string(),
                ))
            } else {
                Ok(VmState::Continue)
            }
        },
    );
}

#[async_trait]
impl Processor for CustomFunctionProcessor {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn node_type(&self) -> &str {
        "custom-function"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn execute(&mut self, input: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        // Each execution gets an isolated VM; no state leaks between
        // invocations or nodes.
        let lua = sandbox()
            .map_err(|err| FlowEngineError::failed(format!("sandbox setup failed: {err}")))?;
        arm_budget_hook(&lua);

        let run = || -> mlua::Result<Value> {
            let globals = lua.globals();
            globals.set("input", lua.to_value(input)?)?;
            lua.load(self.code.as_str())
                .set_name(format!("node:{}", self.node_id))
                .exec()?;
            let result: mlua::Value = globals.get("result")?;
            if result.is_nil() {
                return Err(mlua::Error::RuntimeError(
                    "function must assign the 'result' global".to_string(),
                ));
            }
            lua.from_value(result)
        };

        let result = run().map_err(|err| {
            FlowEngineError::failed(format!("user function failed: {err}"))
        })?;

        let mut output = HashMap::new();
        output.insert("output".to_string(), result);
        output.insert("node_kind".to_string(), json!("custom-function"));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::ExecutionContext;

    fn ctx() -> FlowContext {
        FlowContext::new(&ExecutionContext::new("flow", None))
    }

    fn function_node(code: &str) -> FlowNode {
        FlowNode::new("fn1", "custom-function").with_config("code", json!(code))
    }

    fn input(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn computes_over_the_input_map() {
        let node = function_node("result = input.output * 2 + 1");
        let mut processor = CustomFunctionProcessor::from_node(&node, ctx()).unwrap();
        let out = processor
            .execute(&input(&[("output", json!(20))]))
            .await
            .unwrap();
        assert_eq!(out["output"], json!(41));
    }

    #[tokio::test]
    async fn can_return_structured_results() {
        let node = function_node(
            "result = { doubled = input.output * 2, label = string.upper('ok') }",
        );
        let mut processor = CustomFunctionProcessor::from_node(&node, ctx()).unwrap();
        let out = processor
            .execute(&input(&[("output", json!(3))]))
            .await
            .unwrap();
        assert_eq!(out["output"]["doubled"], json!(6));
        assert_eq!(out["output"]["label"], json!("OK"));
    }

    #[tokio::test]
    async fn missing_result_global_is_an_error() {
        let node = function_node("local x = 1 + 1");
        let mut processor = CustomFunctionProcessor::from_node(&node, ctx()).unwrap();
        let err = processor.execute(&input(&[])).await.unwrap_err();
        assert!(err.to_string().contains("result"));
    }

    #[tokio::test]
    async fn runaway_loops_hit_the_instruction_budget() {
        let node = function_node("while true do end");
        let mut processor = CustomFunctionProcessor::from_node(&node, ctx()).unwrap();
        let err = processor.execute(&input(&[])).await.unwrap_err();
        assert!(err.to_string().contains("instruction budget"));
    }

    #[tokio::test]
    async fn os_and_io_do_not_exist_in_the_sandbox() {
        let node = function_node("result = tostring(os) .. tostring(io)");
        let mut processor = CustomFunctionProcessor::from_node(&node, ctx()).unwrap();
        let out = processor.execute(&input(&[])).await.unwrap();
        assert_eq!(out["output"], json!("nilnil"));
    }

    #[test]
    fn validation_rejects_empty_and_unparseable_code() {
        assert!(matches!(
            CustomFunctionProcessor::from_node(&function_node("   "), ctx()),
            Err(FlowEngineError::InvalidConfig { .. })
        ));
        assert!(CustomFunctionProcessor::from_node(
            &function_node("this is not lua ("),
            ctx()
        )
        .is_err());

        let node = FlowNode::new("fn1", "custom-function");
        assert!(CustomFunctionProcessor::from_node(&node, ctx()).is_err());
    }

    #[test]
    fn validation_rejects_oversized_code() {
        let big = format!("result = 1 --{}", "x".repeat(MAX_CODE_BYTES));
        assert!(CustomFunctionProcessor::from_node(&function_node(&big), ctx()).is_err());
    }
}
