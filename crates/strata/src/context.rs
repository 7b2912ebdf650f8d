/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The accumulating execution context threaded through a stack.
//!
//! A [`Context`] is an immutable record folded over the outputs of every task
//! in a stack. [`Context::bind`] combines a context with one task's
//! [`TaskResult`]: mappings merge with later-wins semantics, lists append.
//! The empty context is the identity for `bind`, and `bind` is associative in
//! the append components.
//!
//! Only one step of a given stack executes at a time, so `bind` never has to
//! merge two concurrently produced contexts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The context record accumulated across a stack's execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Named values; later writes win on collision.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Every task's direct output, in execution order.
    #[serde(default)]
    pub outputs: Vec<Value>,
    /// Audit trail of decision strings.
    #[serde(default)]
    pub decisions: Vec<String>,
    /// Accumulated error strings.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Free-form metadata; later writes win on collision.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Context {
    /// The empty context; identity element for [`Context::bind`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one task's result into this context, returning the combined
    /// context. The receiver is left untouched.
    ///
    /// The task's `output` is always appended to `outputs`, including a JSON
    /// null for tasks that produced none, so that `outputs.len()` counts
    /// completed steps.
    pub fn bind(&self, result: &TaskResult) -> Context {
        let mut next = self.clone();
        for (key, value) in &result.variables {
            next.variables.insert(key.clone(), value.clone());
        }
        next.outputs.push(result.output.clone());
        next.decisions.extend(result.decisions.iter().cloned());
        next.errors.extend(result.errors.iter().cloned());
        for (key, value) in &result.metadata {
            next.metadata.insert(key.clone(), value.clone());
        }
        next
    }

    /// Deserializes a context from its JSON text form, treating empty or
    /// malformed text as the empty context.
    pub fn from_json_str(text: &str) -> Context {
        if text.trim().is_empty() {
            return Context::default();
        }
        serde_json::from_str(text).unwrap_or_default()
    }

    /// Serializes the context to JSON text for storage and env injection.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A task scheduled by a parent through `push_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushTask {
    pub task_id: String,
    #[serde(default)]
    pub parameters: Value,
    /// Optional human-readable reason, carried through to the trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The structured record a task reports through its stdout.
///
/// Tasks emit a JSON object line containing `"__task_result__": true`; tasks
/// that do not are wrapped in a bare result whose `output` is their trimmed
/// stdout. See [`crate::executor::parse_task_result`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task's direct output value.
    #[serde(default)]
    pub output: Value,
    /// Variables to merge into the context.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Decision strings to append to the context.
    #[serde(default)]
    pub decisions: Vec<String>,
    /// Error strings to append to the context.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Metadata to merge into the context.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Children to push onto the stack, in the order they should execute.
    #[serde(default)]
    pub push_tasks: Vec<PushTask>,
    /// When true, the whole stack is failed after this step.
    #[serde(default)]
    pub abort: bool,
}

impl TaskResult {
    /// Wraps plain stdout in a result with no structured fields.
    pub fn bare(output: Value) -> Self {
        TaskResult {
            output,
            ..Default::default()
        }
    }
}

/// Merges JSON object maps with later-wins semantics. Non-object inputs
/// contribute nothing.
pub fn merge_parameters(base: &Value, overlay: &Value) -> Value {
    let mut merged = Map::new();
    if let Value::Object(map) = base {
        for (k, v) in map {
            merged.insert(k.clone(), v.clone());
        }
    }
    if let Value::Object(map) = overlay {
        for (k, v) in map {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}
