//! Serialization boundary for IR snapshots
//!
//! Step payloads come from arbitrary user code. Before an IR leaves the
//! process (sinks, CLI output, renderers) payloads are sanitized:
//! - nesting deeper than `MAX_PAYLOAD_DEPTH` is cut with a placeholder, so
//!   self-referencing payload shapes cannot blow the stack of a recursive
//!   serializer
//! - integers outside the IEEE-754 safe range become strings, so JavaScript
//!   consumers receive them without precision loss
//! - anything that still fails to serialize degrades to a placeholder string

use serde::Serialize;
use serde_json::{Map, Value};

use super::{HookMap, Node, WorkflowIr};

/// Maximum payload nesting kept at the boundary
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// 2^53 - 1
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

const DEPTH_PLACEHOLDER: &str = "[Max depth exceeded]";

/// Serialize anything to a JSON string, never failing
///
/// On failure the result is a JSON string literal holding a placeholder.
pub fn safe_stringify<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::debug!(error = %e, "Payload serialization failed");
            Value::String(format!("[Unserializable: {}]", e)).to_string()
        }
    }
}

/// Depth-limited copy of a payload with unsafe integers stringified
pub fn sanitize_payload(value: &Value) -> Value {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) if depth >= MAX_PAYLOAD_DEPTH => {
            Value::String(DEPTH_PLACEHOLDER.to_string())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_at(item, depth + 1))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.clone(), sanitize_at(item, depth + 1));
            }
            Value::Object(out)
        }
        Value::Number(n) => {
            let unsafe_int = n.as_u64().is_some_and(|u| u > MAX_SAFE_INTEGER)
                || n.as_i64().is_some_and(|i| i.unsigned_abs() > MAX_SAFE_INTEGER);
            if unsafe_int {
                Value::String(n.to_string())
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

fn sanitize_opt(payload: &mut Option<Value>) {
    if let Some(value) = payload.as_mut() {
        *value = sanitize_payload(value);
    }
}

fn sanitize_node(node: &mut Node) {
    match node {
        Node::Workflow(n) => {
            sanitize_opt(&mut n.error);
            n.children.iter_mut().for_each(sanitize_node);
        }
        Node::Step(n) => {
            sanitize_opt(&mut n.input);
            sanitize_opt(&mut n.output);
            sanitize_opt(&mut n.error);
        }
        Node::Parallel(n) => n.children.iter_mut().for_each(sanitize_node),
        Node::Decision(n) => {
            sanitize_opt(&mut n.decision_value);
            for branch in &mut n.branches {
                branch.children.iter_mut().for_each(sanitize_node);
            }
        }
        Node::Stream(n) => sanitize_opt(&mut n.error),
    }
}

fn sanitize_hooks(hooks: &mut HookMap) {
    for exec in hooks
        .should_run
        .iter_mut()
        .chain(hooks.on_before_start.iter_mut())
        .chain(hooks.on_after_step.values_mut())
    {
        sanitize_opt(&mut exec.error);
    }
}

impl WorkflowIr {
    /// Copy of this IR with every payload sanitized
    pub fn sanitized(&self) -> WorkflowIr {
        let mut ir = self.clone();
        sanitize_node(&mut ir.root);
        if let Some(hooks) = ir.hooks.as_mut() {
            sanitize_hooks(hooks);
        }
        ir
    }

    /// JSON value safe to hand to any consumer
    pub fn to_json_safe(&self) -> Value {
        serde_json::to_value(self.sanitized()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "IR serialization failed");
            Value::String(format!("[Unserializable: {}]", e))
        })
    }

    /// JSON text safe to hand to any consumer
    pub fn to_json_string_safe(&self, pretty: bool) -> String {
        let value = self.to_json_safe();
        let rendered = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        rendered.unwrap_or_else(|_| safe_stringify(&value))
    }
}
