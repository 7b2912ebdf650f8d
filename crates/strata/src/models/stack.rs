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

//! Execution stacks and their per-step queue rows.
//!
//! A stack is a LIFO tree of task invocations rooted at a single task,
//! sharing an accumulated [`Context`]. The stack row holds the current
//! context and, once terminal, the trace and final output; each scheduled
//! sub-task is one `stack_queue` row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{Context, PushTask};
use crate::database::schema::{execution_stacks, stack_queue};
use crate::models::queue::QueueStatus;
use crate::models::{blob_to_uuid, string_to_datetime};

/// Lifecycle of a stack: `running → (done|failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Running,
    Done,
    Failed,
}

impl StackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::Running => "running",
            StackStatus::Done => "done",
            StackStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StackStatus::Running)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(StackStatus::Running),
            "done" => Ok(StackStatus::Done),
            "failed" => Ok(StackStatus::Failed),
            other => Err(format!("unknown stack status: {other}")),
        }
    }
}

/// One step of a finished stack, assembled from its queue rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub queue_id: i64,
    pub task_id: String,
    pub depth: i32,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time of the step in milliseconds, when both timestamps exist.
    pub execution_ms: Option<i64>,
    pub input_context: Context,
    pub output_context: Option<Context>,
    pub output: Option<Value>,
    pub pushed_tasks: Vec<PushTask>,
    pub error: Option<String>,
}

/// An execution stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStack {
    pub stack_id: Uuid,
    pub request_id: Option<Uuid>,
    pub status: StackStatus,
    pub initial_task_id: String,
    pub context: Context,
    pub trace: Option<Vec<TraceEntry>>,
    pub final_output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One scheduled sub-task within a stack.
#[derive(Debug, Clone)]
pub struct StackQueueEntry {
    pub queue_id: i64,
    pub stack_id: Uuid,
    pub task_id: String,
    pub depth: i32,
    pub parent_queue_id: Option<i64>,
    pub sequence: i32,
    pub status: QueueStatus,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub parameters: Value,
    /// Context snapshot; re-sampled from the stack row at claim time.
    pub input_context: Context,
    pub output: Option<Value>,
    pub output_context: Option<Context>,
    pub pushed_tasks: Vec<PushTask>,
    pub error_message: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of creating a stack; duplicates surface the existing stack.
#[derive(Debug, Clone)]
pub struct CreatedStack {
    pub stack_id: Uuid,
    pub root_queue_id: i64,
    pub is_duplicate: bool,
}

// ============================================================================
// SQLite row models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = execution_stacks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StackRow {
    pub stack_id: Vec<u8>,
    pub request_id: Option<Vec<u8>>,
    pub status: String,
    pub initial_task_id: String,
    pub context: String,
    pub trace: Option<String>,
    pub final_output: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = execution_stacks)]
pub struct NewStackRow {
    pub stack_id: Vec<u8>,
    pub request_id: Option<Vec<u8>>,
    pub status: String,
    pub initial_task_id: String,
    pub context: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = stack_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StackQueueRow {
    pub queue_id: i64,
    pub stack_id: Vec<u8>,
    pub task_id: String,
    pub depth: i32,
    pub parent_queue_id: Option<i64>,
    pub sequence: i32,
    pub status: String,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<String>,
    pub parameters: String,
    pub input_context: String,
    pub output: Option<String>,
    pub output_context: Option<String>,
    pub pushed_tasks: Option<String>,
    pub error_message: Option<String>,
    pub enqueued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = stack_queue)]
pub struct NewStackQueueRow {
    pub stack_id: Vec<u8>,
    pub task_id: String,
    pub depth: i32,
    pub parent_queue_id: Option<i64>,
    pub sequence: i32,
    pub status: String,
    pub parameters: String,
    pub input_context: String,
    pub enqueued_at: String,
}

impl From<StackRow> for ExecutionStack {
    fn from(row: StackRow) -> Self {
        ExecutionStack {
            stack_id: blob_to_uuid(&row.stack_id).expect("Invalid UUID in database"),
            request_id: row
                .request_id
                .map(|b| blob_to_uuid(&b).expect("Invalid UUID in database")),
            status: row.status.parse().expect("Invalid status in database"),
            initial_task_id: row.initial_task_id,
            context: Context::from_json_str(&row.context),
            trace: row
                .trace
                .map(|t| serde_json::from_str(&t).expect("Invalid trace JSON in database")),
            final_output: row
                .final_output
                .map(|o| serde_json::from_str(&o).expect("Invalid JSON in database")),
            error: row.error,
            created_at: string_to_datetime(&row.created_at)
                .expect("Invalid timestamp in database"),
            finished_at: row
                .finished_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
        }
    }
}

impl From<StackQueueRow> for StackQueueEntry {
    fn from(row: StackQueueRow) -> Self {
        StackQueueEntry {
            queue_id: row.queue_id,
            stack_id: blob_to_uuid(&row.stack_id).expect("Invalid UUID in database"),
            task_id: row.task_id,
            depth: row.depth,
            parent_queue_id: row.parent_queue_id,
            sequence: row.sequence,
            status: row.status.parse().expect("Invalid status in database"),
            worker_id: row.worker_id,
            lease_expires_at: row
                .lease_expires_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
            parameters: serde_json::from_str(&row.parameters).expect("Invalid JSON in database"),
            input_context: Context::from_json_str(&row.input_context),
            output: row
                .output
                .map(|o| serde_json::from_str(&o).expect("Invalid JSON in database")),
            output_context: row.output_context.as_deref().map(Context::from_json_str),
            pushed_tasks: row
                .pushed_tasks
                .map(|p| serde_json::from_str(&p).expect("Invalid JSON in database"))
                .unwrap_or_default(),
            error_message: row.error_message,
            enqueued_at: string_to_datetime(&row.enqueued_at)
                .expect("Invalid timestamp in database"),
            started_at: row
                .started_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
            finished_at: row
                .finished_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
        }
    }
}

impl StackQueueRow {
    /// Builds the trace entry for this row.
    pub fn to_trace_entry(&self) -> TraceEntry {
        let started = self
            .started_at
            .as_deref()
            .and_then(|ts| string_to_datetime(ts).ok());
        let finished = self
            .finished_at
            .as_deref()
            .and_then(|ts| string_to_datetime(ts).ok());
        let execution_ms = match (started, finished) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds()),
            _ => None,
        };

        TraceEntry {
            queue_id: self.queue_id,
            task_id: self.task_id.clone(),
            depth: self.depth,
            status: self.status.clone(),
            started_at: started,
            finished_at: finished,
            execution_ms,
            input_context: Context::from_json_str(&self.input_context),
            output_context: self.output_context.as_deref().map(Context::from_json_str),
            output: self
                .output
                .as_deref()
                .and_then(|o| serde_json::from_str(o).ok()),
            pushed_tasks: self
                .pushed_tasks
                .as_deref()
                .and_then(|p| serde_json::from_str(p).ok())
                .unwrap_or_default(),
            error: self.error_message.clone(),
        }
    }
}
