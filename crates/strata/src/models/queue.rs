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

//! Single-shot queue entries and fan-out records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::schema::{task_fanout, task_queue};
use crate::models::task::{Interpreter, TaskKind};
use crate::models::{blob_to_uuid, string_to_datetime, uuid_to_blob};

/// Lifecycle of a queue entry: `queued → running → (done|failed|cancelled)`.
/// A `running` entry with an expired lease is claimable again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Running => "running",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Done | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "running" => Ok(QueueStatus::Running),
            "done" => Ok(QueueStatus::Done),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// A row in the single-shot task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: i64,
    pub request_id: Uuid,
    pub task_id: String,
    pub parameters: Value,
    pub status: QueueStatus,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of an enqueue call; duplicates surface the existing row.
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub queue_id: i64,
    pub request_id: Uuid,
    pub status: QueueStatus,
    pub is_duplicate: bool,
}

/// What a fan-out row schedules: an existing task or an inline ephemeral
/// definition registered at fan-out time.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutTarget {
    Existing {
        task_id: String,
    },
    Inline {
        kind: TaskKind,
        interpreter: Interpreter,
        code: String,
        timeout_seconds: i32,
    },
}

/// A child queued after its parent completes successfully.
#[derive(Debug, Clone)]
pub struct FanoutRecord {
    pub fanout_id: i64,
    pub parent_queue_id: i64,
    pub target: FanoutTarget,
    pub parameters: Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a fan-out row.
#[derive(Debug, Clone)]
pub struct NewFanout {
    pub parent_queue_id: i64,
    pub target: FanoutTarget,
    pub parameters: Value,
}

// ============================================================================
// SQLite row models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = task_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueRow {
    pub queue_id: i64,
    pub request_id: Vec<u8>,
    pub task_id: String,
    pub parameters: String,
    pub status: String,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<String>,
    pub enqueued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = task_queue)]
pub struct NewQueueRow {
    pub request_id: Vec<u8>,
    pub task_id: String,
    pub parameters: String,
    pub status: String,
    pub enqueued_at: String,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = task_fanout)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FanoutRow {
    pub fanout_id: i64,
    pub parent_queue_id: i64,
    pub child_task_id: Option<String>,
    pub child_parameters: String,
    pub inline_kind: Option<String>,
    pub inline_interpreter: Option<String>,
    pub inline_code: Option<String>,
    pub inline_timeout_seconds: Option<i32>,
    pub processed: bool,
    pub created_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = task_fanout)]
pub struct NewFanoutRow {
    pub parent_queue_id: i64,
    pub child_task_id: Option<String>,
    pub child_parameters: String,
    pub inline_kind: Option<String>,
    pub inline_interpreter: Option<String>,
    pub inline_code: Option<String>,
    pub inline_timeout_seconds: Option<i32>,
    pub processed: bool,
    pub created_at: String,
}

impl From<QueueRow> for QueueEntry {
    fn from(row: QueueRow) -> Self {
        QueueEntry {
            queue_id: row.queue_id,
            request_id: blob_to_uuid(&row.request_id).expect("Invalid UUID in database"),
            task_id: row.task_id,
            parameters: serde_json::from_str(&row.parameters).expect("Invalid JSON in database"),
            status: row.status.parse().expect("Invalid status in database"),
            worker_id: row.worker_id,
            lease_expires_at: row
                .lease_expires_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
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

impl From<FanoutRow> for FanoutRecord {
    fn from(row: FanoutRow) -> Self {
        let target = match row.child_task_id {
            Some(task_id) => FanoutTarget::Existing { task_id },
            None => FanoutTarget::Inline {
                kind: row
                    .inline_kind
                    .as_deref()
                    .unwrap_or("shell")
                    .parse()
                    .expect("Invalid task kind in database"),
                interpreter: row
                    .inline_interpreter
                    .as_deref()
                    .unwrap_or("sh")
                    .parse()
                    .expect("Invalid interpreter in database"),
                code: row.inline_code.unwrap_or_default(),
                timeout_seconds: row.inline_timeout_seconds.unwrap_or(300),
            },
        };
        FanoutRecord {
            fanout_id: row.fanout_id,
            parent_queue_id: row.parent_queue_id,
            target,
            parameters: serde_json::from_str(&row.child_parameters)
                .expect("Invalid JSON in database"),
            processed: row.processed,
            created_at: string_to_datetime(&row.created_at)
                .expect("Invalid timestamp in database"),
        }
    }
}

impl NewFanoutRow {
    pub fn from_new(fanout: &NewFanout, created_at: String) -> Self {
        match &fanout.target {
            FanoutTarget::Existing { task_id } => NewFanoutRow {
                parent_queue_id: fanout.parent_queue_id,
                child_task_id: Some(task_id.clone()),
                child_parameters: fanout.parameters.to_string(),
                inline_kind: None,
                inline_interpreter: None,
                inline_code: None,
                inline_timeout_seconds: None,
                processed: false,
                created_at,
            },
            FanoutTarget::Inline {
                kind,
                interpreter,
                code,
                timeout_seconds,
            } => NewFanoutRow {
                parent_queue_id: fanout.parent_queue_id,
                child_task_id: None,
                child_parameters: fanout.parameters.to_string(),
                inline_kind: Some(kind.as_str().to_string()),
                inline_interpreter: Some(interpreter.as_str().to_string()),
                inline_code: Some(code.clone()),
                inline_timeout_seconds: Some(*timeout_seconds),
                processed: false,
                created_at,
            },
        }
    }
}

/// Helper for inserting a fresh queue row.
pub fn new_queue_row(
    request_id: &Uuid,
    task_id: &str,
    parameters: &Value,
    enqueued_at: String,
) -> NewQueueRow {
    NewQueueRow {
        request_id: uuid_to_blob(request_id),
        task_id: task_id.to_string(),
        parameters: parameters.to_string(),
        status: QueueStatus::Queued.as_str().to_string(),
        enqueued_at,
    }
}
