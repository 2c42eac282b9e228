//! Shared accessors for node config maps and merged input maps.
//!
//! Inputs arrive as the merged outputs of upstream nodes; by convention
//! the interesting value sits under `output`, with `value` as the
//! fallback. Present-but-null counts as missing.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

/// The primary input value: `output`, else `value`
pub(crate) fn input_value(input: &HashMap<String, Value>) -> Option<&Value> {
    match input.get("output") {
        Some(Value::Null) | None => match input.get("value") {
            Some(Value::Null) | None => None,
            other => other,
        },
        other => other,
    }
}

pub(crate) fn str_prop(config: &HashMap<String, Value>, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn f64_prop(config: &HashMap<String, Value>, key: &str) -> Option<f64> {
    config.get(key).and_then(coerce_f64)
}

pub(crate) fn u64_prop(config: &HashMap<String, Value>, key: &str) -> Option<u64> {
    config.get(key).and_then(Value::as_u64)
}

pub(crate) fn bool_prop(config: &HashMap<String, Value>, key: &str) -> Option<bool> {
    config.get(key).and_then(Value::as_bool)
}

/// Numeric coercion: numbers pass through, numeric strings parse,
/// booleans map to 1/0
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Boolean coercion: strings accept true/1/on/yes/high (case
/// insensitive), numbers are true when positive
pub(crate) fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            Some(matches!(
                lowered.as_str(),
                "true" | "1" | "on" | "yes" | "high"
            ))
        }
        Value::Number(n) => n.as_f64().map(|v| v > 0.0),
        _ => None,
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
