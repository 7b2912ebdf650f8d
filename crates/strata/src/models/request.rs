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

//! Agent-submitted task requests.
//!
//! A request is an externally submitted, prioritized, dependency-aware unit
//! of work. The dispatcher claims eligible requests and runs each as a fresh
//! stack; DEPENDS_ON edges gate claiming until every dependency is `done`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::schema::{request_dependencies, task_requests};
use crate::models::{blob_to_uuid, string_to_datetime};

/// Priority bounds for requests; out-of-range submissions are clamped.
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 1000;
pub const DEFAULT_PRIORITY: i32 = 100;

/// Request lifecycle.
///
/// `blocked → pending` happens only forward (as dependencies complete);
/// `pending → claimed → executing → (done|failed)`; `cancelled` is reachable
/// only from `pending` or `blocked`. Terminal statuses never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Blocked,
    Claimed,
    Executing,
    Done,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Blocked => "blocked",
            RequestStatus::Claimed => "claimed",
            RequestStatus::Executing => "executing",
            RequestStatus::Done => "done",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Done | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Only pre-claim states are user-cancellable.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Blocked)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "blocked" => Ok(RequestStatus::Blocked),
            "claimed" => Ok(RequestStatus::Claimed),
            "executing" => Ok(RequestStatus::Executing),
            "done" => Ok(RequestStatus::Done),
            "failed" => Ok(RequestStatus::Failed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// An agent-submitted task request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub request_id: Uuid,
    pub task_id: String,
    /// JSON-encoded parameter object, as submitted.
    pub parameters: Value,
    pub priority: i32,
    pub requester: String,
    pub status: RequestStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_ref: Option<String>,
    pub error: Option<String>,
    /// Cascade rule that synthesized this request, if any.
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for submitting a request.
#[derive(Debug, Clone)]
pub struct NewTaskRequest {
    /// Explicit id for idempotent submission; generated when absent.
    pub request_id: Option<Uuid>,
    pub task_id: String,
    pub parameters: Value,
    pub priority: i32,
    pub requester: String,
    pub depends_on: Vec<Uuid>,
    pub triggered_by: Option<String>,
}

impl NewTaskRequest {
    pub fn new(task_id: impl Into<String>, parameters: Value) -> Self {
        NewTaskRequest {
            request_id: None,
            task_id: task_id.into(),
            parameters,
            priority: DEFAULT_PRIORITY,
            requester: "unknown".to_string(),
            depends_on: Vec::new(),
            triggered_by: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn depends_on(mut self, dependencies: Vec<Uuid>) -> Self {
        self.depends_on = dependencies;
        self
    }
}

// ============================================================================
// SQLite row models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = task_requests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RequestRow {
    pub request_id: Vec<u8>,
    pub task_id: String,
    pub parameters: String,
    pub priority: i32,
    pub requester: String,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub finished_at: Option<String>,
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub triggered_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = task_requests)]
pub struct NewRequestRow {
    pub request_id: Vec<u8>,
    pub task_id: String,
    pub parameters: String,
    pub priority: i32,
    pub requester: String,
    pub status: String,
    pub triggered_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_dependencies)]
pub struct NewDependencyRow {
    pub request_id: Vec<u8>,
    pub depends_on: Vec<u8>,
}

impl From<RequestRow> for TaskRequest {
    fn from(row: RequestRow) -> Self {
        TaskRequest {
            request_id: blob_to_uuid(&row.request_id).expect("Invalid UUID in database"),
            task_id: row.task_id,
            parameters: serde_json::from_str(&row.parameters).expect("Invalid JSON in database"),
            priority: row.priority,
            requester: row.requester,
            status: row.status.parse().expect("Invalid status in database"),
            claimed_by: row.claimed_by,
            claimed_at: row
                .claimed_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
            finished_at: row
                .finished_at
                .map(|ts| string_to_datetime(&ts).expect("Invalid timestamp in database")),
            result_ref: row.result_ref,
            error: row.error,
            triggered_by: row.triggered_by,
            created_at: string_to_datetime(&row.created_at)
                .expect("Invalid timestamp in database"),
        }
    }
}

/// Clamp a submitted priority into the valid range.
pub fn clamp_priority(priority: i32) -> i32 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}
