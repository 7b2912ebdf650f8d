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

//! Execution stack operations.
//!
//! Within a stack, claiming is LIFO: the highest eligible `queue_id` wins,
//! so the most recently pushed child executes first. Children authored
//! together are inserted in reverse list order, which makes the LIFO claim
//! process them in the author-declared order.
//!
//! The accumulated context lives on the stack row. At claim time the current
//! context is re-sampled into the claimed row's `input_context`, overwriting
//! the snapshot taken at push time, so each child observes the state as of
//! its own execution rather than its enqueue.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use tracing::debug;
use uuid::Uuid;

use super::{with_write_retry, DAL};
use crate::context::{Context, PushTask};
use crate::database::schema::{execution_stacks, stack_queue};
use crate::error::StoreError;
use crate::models::queue::QueueStatus;
use crate::models::stack::{
    CreatedStack, ExecutionStack, NewStackQueueRow, NewStackRow, StackQueueEntry, StackQueueRow,
    StackRow, StackStatus, TraceEntry,
};
use crate::models::{current_timestamp_string, datetime_to_string, uuid_to_blob};

/// Everything written when one step finishes.
#[derive(Debug)]
pub struct StepFinalization<'a> {
    pub queue_id: i64,
    pub stack_id: Uuid,
    /// `done` or `failed`; the step state machine has no other exits here.
    pub status: QueueStatus,
    pub output: serde_json::Value,
    pub output_context: &'a Context,
    /// Children to push, in author-declared execution order.
    pub pushed_tasks: &'a [PushTask],
    pub error_message: Option<String>,
}

pub struct StackDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> StackDAL<'a> {
    /// Creates a stack with its root entry at depth 0, sequence 0.
    ///
    /// `request_id` is the idempotency key: creating again with the same id
    /// returns the existing stack flagged as a duplicate.
    pub fn create(
        &self,
        task_id: &str,
        parameters: &serde_json::Value,
        request_id: Option<Uuid>,
    ) -> Result<CreatedStack, StoreError> {
        let mut conn = self.dal.database.conn()?;

        let created = conn.immediate_transaction::<CreatedStack, DieselError, _>(|conn| {
            if let Some(rid) = request_id {
                let existing: Option<StackRow> = execution_stacks::table
                    .filter(execution_stacks::request_id.eq(uuid_to_blob(&rid)))
                    .select(StackRow::as_select())
                    .first(conn)
                    .optional()?;
                if let Some(row) = existing {
                    let root: StackQueueRow = stack_queue::table
                        .filter(stack_queue::stack_id.eq(&row.stack_id))
                        .order(stack_queue::queue_id.asc())
                        .select(StackQueueRow::as_select())
                        .first(conn)?;
                    return Ok(CreatedStack {
                        stack_id: crate::models::blob_to_uuid(&row.stack_id)
                            .expect("Invalid UUID in database"),
                        root_queue_id: root.queue_id,
                        is_duplicate: true,
                    });
                }
            }

            let stack_id = Uuid::new_v4();
            let now = current_timestamp_string();

            diesel::insert_into(execution_stacks::table)
                .values(NewStackRow {
                    stack_id: uuid_to_blob(&stack_id),
                    request_id: request_id.map(|rid| uuid_to_blob(&rid)),
                    status: StackStatus::Running.as_str().to_string(),
                    initial_task_id: task_id.to_string(),
                    context: Context::new().to_json_string(),
                    created_at: now.clone(),
                })
                .execute(conn)?;

            let root: StackQueueRow = diesel::insert_into(stack_queue::table)
                .values(NewStackQueueRow {
                    stack_id: uuid_to_blob(&stack_id),
                    task_id: task_id.to_string(),
                    depth: 0,
                    parent_queue_id: None,
                    sequence: 0,
                    status: QueueStatus::Queued.as_str().to_string(),
                    parameters: parameters.to_string(),
                    input_context: Context::new().to_json_string(),
                    enqueued_at: now,
                })
                .get_result(conn)?;

            Ok(CreatedStack {
                stack_id,
                root_queue_id: root.queue_id,
                is_duplicate: false,
            })
        })?;

        debug!(
            stack_id = %created.stack_id,
            task_id,
            duplicate = created.is_duplicate,
            "Created execution stack"
        );
        Ok(created)
    }

    /// Fetches a stack by id.
    pub fn get(&self, stack_id: Uuid) -> Result<Option<ExecutionStack>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row: Option<StackRow> = execution_stacks::table
            .find(uuid_to_blob(&stack_id))
            .select(StackRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    /// All queue rows of a stack, ascending by `queue_id`.
    pub fn entries(&self, stack_id: Uuid) -> Result<Vec<StackQueueEntry>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let rows: Vec<StackQueueRow> = stack_queue::table
            .filter(stack_queue::stack_id.eq(uuid_to_blob(&stack_id)))
            .order(stack_queue::queue_id.asc())
            .select(StackQueueRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Atomically claims the next step of a stack: the *highest* eligible
    /// `queue_id` (LIFO). The claimed row's `input_context` is overwritten
    /// with the stack's current context in the same transaction.
    pub fn claim_next(
        &self,
        stack_id: Uuid,
        worker: &str,
        lease_seconds: i64,
    ) -> Result<Option<StackQueueEntry>, StoreError> {
        let stack_blob = uuid_to_blob(&stack_id);

        let row = with_write_retry(|| {
            let mut conn = self.dal.database.conn()?;
            let stack_blob = stack_blob.clone();
            conn.immediate_transaction::<Option<StackQueueRow>, DieselError, _>(|conn| {
                let now = Utc::now();
                let now_s = datetime_to_string(&now);

                let candidate: Option<StackQueueRow> = stack_queue::table
                    .filter(stack_queue::stack_id.eq(&stack_blob))
                    .filter(
                        stack_queue::status.eq("queued").or(stack_queue::status
                            .eq("running")
                            .and(stack_queue::lease_expires_at.lt(now_s.clone()))),
                    )
                    .order(stack_queue::queue_id.desc())
                    .select(StackQueueRow::as_select())
                    .first(conn)
                    .optional()?;

                let Some(candidate) = candidate else {
                    return Ok(None);
                };

                let lease = datetime_to_string(&(now + Duration::seconds(lease_seconds)));
                let claimed = diesel::update(
                    stack_queue::table
                        .filter(stack_queue::queue_id.eq(candidate.queue_id))
                        .filter(
                            stack_queue::status.eq("queued").or(stack_queue::status
                                .eq("running")
                                .and(stack_queue::lease_expires_at.lt(now_s.clone()))),
                        ),
                )
                .set((
                    stack_queue::status.eq("running"),
                    stack_queue::worker_id.eq(worker),
                    stack_queue::started_at.eq(&now_s),
                    stack_queue::lease_expires_at.eq(&lease),
                ))
                .execute(conn)?;

                if claimed == 0 {
                    return Ok(None);
                }

                // Dynamic context snapshot: the child observes the stack as
                // of its own execution, not its enqueue.
                let current_context: String = execution_stacks::table
                    .find(&stack_blob)
                    .select(execution_stacks::context)
                    .first(conn)?;
                diesel::update(stack_queue::table.find(candidate.queue_id))
                    .set(stack_queue::input_context.eq(&current_context))
                    .execute(conn)?;

                let row = stack_queue::table
                    .find(candidate.queue_id)
                    .select(StackQueueRow::as_select())
                    .first(conn)?;
                Ok(Some(row))
            })
            .map_err(StoreError::from)
        })?;

        if let Some(ref row) = row {
            debug!(
                stack_id = %stack_id,
                queue_id = row.queue_id,
                task_id = %row.task_id,
                "Claimed stack step"
            );
        }
        Ok(row.map(Into::into))
    }

    /// Persists a finished step: finalizes the row, inserts pushed children
    /// (reverse list order so the LIFO claim runs them in author order), and
    /// stores the new accumulated context on the stack row, atomically.
    pub fn finalize_step(&self, step: StepFinalization<'_>) -> Result<(), StoreError> {
        let mut conn = self.dal.database.conn()?;
        let stack_blob = uuid_to_blob(&step.stack_id);

        conn.immediate_transaction::<(), DieselError, _>(|conn| {
            let now = current_timestamp_string();

            let parent: StackQueueRow = stack_queue::table
                .find(step.queue_id)
                .select(StackQueueRow::as_select())
                .first(conn)?;

            let pushed_json = serde_json::to_string(step.pushed_tasks)
                .unwrap_or_else(|_| "[]".to_string());
            let context_json = step.output_context.to_json_string();

            diesel::update(stack_queue::table.find(step.queue_id))
                .set((
                    stack_queue::status.eq(step.status.as_str()),
                    stack_queue::output.eq(step.output.to_string()),
                    stack_queue::output_context.eq(&context_json),
                    stack_queue::pushed_tasks.eq(&pushed_json),
                    stack_queue::error_message.eq(step.error_message.as_deref()),
                    stack_queue::lease_expires_at.eq(None::<String>),
                    stack_queue::finished_at.eq(&now),
                ))
                .execute(conn)?;

            for (index, child) in step.pushed_tasks.iter().enumerate().rev() {
                diesel::insert_into(stack_queue::table)
                    .values(NewStackQueueRow {
                        stack_id: stack_blob.clone(),
                        task_id: child.task_id.clone(),
                        depth: parent.depth + 1,
                        parent_queue_id: Some(step.queue_id),
                        sequence: index as i32,
                        status: QueueStatus::Queued.as_str().to_string(),
                        parameters: child.parameters.to_string(),
                        input_context: context_json.clone(),
                        enqueued_at: now.clone(),
                    })
                    .execute(conn)?;
            }

            diesel::update(execution_stacks::table.find(&stack_blob))
                .set(execution_stacks::context.eq(&context_json))
                .execute(conn)?;

            Ok(())
        })?;

        debug!(
            stack_id = %step.stack_id,
            queue_id = step.queue_id,
            status = %step.status,
            pushed = step.pushed_tasks.len(),
            "Finalized stack step"
        );
        Ok(())
    }

    /// Rows of a stack that are not yet terminal.
    pub fn open_entry_count(&self, stack_id: Uuid) -> Result<i64, StoreError> {
        let mut conn = self.dal.database.conn()?;
        Ok(stack_queue::table
            .filter(stack_queue::stack_id.eq(uuid_to_blob(&stack_id)))
            .filter(stack_queue::status.eq_any(["queued", "running"]))
            .count()
            .get_result(&mut conn)?)
    }

    /// Finalizes a whole stack: assembles the per-step trace from its rows,
    /// stores the accumulated context as the final output, and stamps the
    /// terminal status. Returns the finished stack.
    pub fn finalize_stack(
        &self,
        stack_id: Uuid,
        status: StackStatus,
        error: Option<String>,
    ) -> Result<ExecutionStack, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let stack_blob = uuid_to_blob(&stack_id);

        let row = conn.immediate_transaction::<StackRow, DieselError, _>(|conn| {
            let rows: Vec<StackQueueRow> = stack_queue::table
                .filter(stack_queue::stack_id.eq(&stack_blob))
                .order(stack_queue::queue_id.asc())
                .select(StackQueueRow::as_select())
                .load(conn)?;
            let trace: Vec<TraceEntry> = rows.iter().map(StackQueueRow::to_trace_entry).collect();
            let trace_json = serde_json::to_string(&trace).unwrap_or_else(|_| "[]".to_string());

            let current_context: String = execution_stacks::table
                .find(&stack_blob)
                .select(execution_stacks::context)
                .first(conn)?;

            diesel::update(execution_stacks::table.find(&stack_blob))
                .set((
                    execution_stacks::status.eq(status.as_str()),
                    execution_stacks::trace.eq(&trace_json),
                    execution_stacks::final_output.eq(&current_context),
                    execution_stacks::error.eq(error.as_deref()),
                    execution_stacks::finished_at.eq(current_timestamp_string()),
                ))
                .execute(conn)?;

            execution_stacks::table
                .find(&stack_blob)
                .select(StackRow::as_select())
                .first(conn)
        })?;

        debug!(stack_id = %stack_id, status = %status, "Finalized stack");
        Ok(row.into())
    }
}
