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

//! JSON artifacts emitted to the runs directory.
//!
//! Every finished single-shot run writes
//! `run_<safe_task_id>_<request_prefix>.json`; every finished stack writes
//! `stack_<stack_prefix>.json`. Artifacts are the operator-facing record:
//! full definition, timings, exit code, cost, stdout/stderr, and fan-out.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::executor::ExecutionCost;
use crate::models::queue::QueueEntry;
use crate::models::stack::{ExecutionStack, TraceEntry};
use crate::models::task::TaskDefinition;

/// Inline capture of a process stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRef {
    pub kind: String,
    pub content: String,
}

impl OutputRef {
    pub fn inline(content: impl Into<String>) -> Self {
        OutputRef {
            kind: "inline".to_string(),
            content: content.into(),
        }
    }
}

/// One invocation inside a run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Task kind that produced this action.
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: i32,
    pub timed_out: bool,
    pub cost: ExecutionCost,
    pub stdout: OutputRef,
    pub stderr: OutputRef,
}

/// Fan-out summary embedded in a run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutArtifact {
    pub fanout_id: i64,
    pub child_task_id: Option<String>,
    pub parameters: Value,
    pub processed: bool,
}

/// The single-shot run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub request_id: Uuid,
    pub queue_id: i64,
    pub status: String,
    pub task: TaskDefinition,
    pub queue_entry: QueueEntry,
    /// Definition defaults overlaid by queue parameters.
    pub merged_parameters: Value,
    pub worker_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub actions: Vec<ActionRecord>,
    pub fanout: Vec<FanoutArtifact>,
}

/// The stack record mirrored to disk on finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    pub stack_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub initial_task_id: String,
    pub final_context: crate::context::Context,
    pub final_output: Option<Value>,
    pub trace: Vec<TraceEntry>,
    pub error: Option<String>,
}

impl From<&ExecutionStack> for StackRecord {
    fn from(stack: &ExecutionStack) -> Self {
        StackRecord {
            stack_id: stack.stack_id,
            status: stack.status.to_string(),
            created_at: stack.created_at,
            finished_at: stack.finished_at,
            initial_task_id: stack.initial_task_id.clone(),
            final_context: stack.context.clone(),
            final_output: stack.final_output.clone(),
            trace: stack.trace.clone().unwrap_or_default(),
            error: stack.error.clone(),
        }
    }
}

/// Replaces everything outside `[A-Za-z0-9._-]` so task ids are filename
/// safe.
pub fn safe_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Short prefix of a UUID used in artifact filenames and result refs.
pub fn id_prefix(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Writes a run record as `run_<safe_task_id>_<request_prefix>.json`.
pub fn write_run_record(runs_dir: &Path, record: &RunRecord) -> std::io::Result<PathBuf> {
    fs::create_dir_all(runs_dir)?;
    let filename = format!(
        "run_{}_{}.json",
        safe_task_id(&record.task.task_id),
        id_prefix(&record.request_id)
    );
    let path = runs_dir.join(filename);
    fs::write(&path, serde_json::to_vec_pretty(record)?)?;
    debug!(path = %path.display(), "Wrote run artifact");
    Ok(path)
}

/// Writes a stack record as `stack_<stack_prefix>.json`.
pub fn write_stack_record(runs_dir: &Path, stack: &ExecutionStack) -> std::io::Result<PathBuf> {
    fs::create_dir_all(runs_dir)?;
    let record = StackRecord::from(stack);
    let path = runs_dir.join(format!("stack_{}.json", id_prefix(&stack.stack_id)));
    fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
    debug!(path = %path.display(), "Wrote stack artifact");
    Ok(path)
}
