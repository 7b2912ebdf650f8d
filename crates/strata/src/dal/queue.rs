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

//! Single-shot queue operations: idempotent enqueue, FIFO claim with lease
//! stealing, finalization, and fan-out processing.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use tracing::debug;
use uuid::Uuid;

use super::{with_write_retry, DAL};
use crate::database::schema::{task_fanout, task_queue, tasks};
use crate::error::StoreError;
use crate::models::queue::{
    new_queue_row, EnqueueOutcome, FanoutRecord, FanoutRow, FanoutTarget, NewFanout, NewFanoutRow,
    QueueEntry, QueueRow, QueueStatus,
};
use crate::models::{current_timestamp_string, datetime_to_string, uuid_to_blob};

pub struct QueueDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> QueueDAL<'a> {
    /// Enqueues a task. `request_id` is the idempotency key: a second call
    /// with the same id returns the existing row flagged as a duplicate.
    pub fn enqueue(
        &self,
        task_id: &str,
        parameters: &serde_json::Value,
        request_id: Option<Uuid>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let request_id = request_id.unwrap_or_else(Uuid::new_v4);
        let mut conn = self.dal.database.conn()?;

        let outcome = conn.immediate_transaction::<EnqueueOutcome, DieselError, _>(|conn| {
            let existing: Option<QueueRow> = task_queue::table
                .filter(task_queue::request_id.eq(uuid_to_blob(&request_id)))
                .select(QueueRow::as_select())
                .first(conn)
                .optional()?;

            if let Some(row) = existing {
                return Ok(EnqueueOutcome {
                    queue_id: row.queue_id,
                    request_id,
                    status: row.status.parse().unwrap_or(QueueStatus::Queued),
                    is_duplicate: true,
                });
            }

            let row: QueueRow = diesel::insert_into(task_queue::table)
                .values(new_queue_row(
                    &request_id,
                    task_id,
                    parameters,
                    current_timestamp_string(),
                ))
                .get_result(conn)?;

            Ok(EnqueueOutcome {
                queue_id: row.queue_id,
                request_id,
                status: QueueStatus::Queued,
                is_duplicate: false,
            })
        })?;

        debug!(
            task_id,
            queue_id = outcome.queue_id,
            duplicate = outcome.is_duplicate,
            "Enqueued task"
        );
        Ok(outcome)
    }

    /// Atomically claims the next eligible row: the lowest `queue_id` that is
    /// `queued`, or `running` with an expired lease. Returns `None` when the
    /// queue is drained.
    pub fn claim_next(
        &self,
        worker: &str,
        lease_seconds: i64,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let row = with_write_retry(|| {
            let mut conn = self.dal.database.conn()?;
            conn.immediate_transaction::<Option<QueueRow>, DieselError, _>(|conn| {
                let now = Utc::now();
                let now_s = datetime_to_string(&now);

                let candidate: Option<QueueRow> = task_queue::table
                    .filter(
                        task_queue::status.eq("queued").or(task_queue::status
                            .eq("running")
                            .and(task_queue::lease_expires_at.lt(now_s.clone()))),
                    )
                    .order(task_queue::queue_id.asc())
                    .select(QueueRow::as_select())
                    .first(conn)
                    .optional()?;

                let Some(candidate) = candidate else {
                    return Ok(None);
                };

                // Conditional update re-tests eligibility so a claim is a
                // single compare-and-swap even outside the write lock.
                let lease = datetime_to_string(&(now + Duration::seconds(lease_seconds)));
                let claimed = diesel::update(
                    task_queue::table
                        .filter(task_queue::queue_id.eq(candidate.queue_id))
                        .filter(
                            task_queue::status.eq("queued").or(task_queue::status
                                .eq("running")
                                .and(task_queue::lease_expires_at.lt(now_s.clone()))),
                        ),
                )
                .set((
                    task_queue::status.eq("running"),
                    task_queue::worker_id.eq(worker),
                    task_queue::started_at.eq(&now_s),
                    task_queue::lease_expires_at.eq(&lease),
                ))
                .execute(conn)?;

                if claimed == 0 {
                    return Ok(None);
                }

                let row = task_queue::table
                    .find(candidate.queue_id)
                    .select(QueueRow::as_select())
                    .first(conn)?;
                Ok(Some(row))
            })
            .map_err(StoreError::from)
        })?;

        if let Some(ref row) = row {
            debug!(queue_id = row.queue_id, worker, "Claimed queue entry");
        }
        Ok(row.map(Into::into))
    }

    /// Fetches a queue entry by id.
    pub fn get(&self, queue_id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row: Option<QueueRow> = task_queue::table
            .find(queue_id)
            .select(QueueRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    /// Re-reads just the status column; used by the runner to detect
    /// cancellation that happened while the child process was running.
    pub fn status_of(&self, queue_id: i64) -> Result<Option<QueueStatus>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let status: Option<String> = task_queue::table
            .find(queue_id)
            .select(task_queue::status)
            .first(&mut conn)
            .optional()?;
        status
            .map(|s| s.parse().map_err(StoreError::UnknownStatus))
            .transpose()
    }

    /// Writes the terminal status, clears the lease, and stamps
    /// `finished_at`, all in one write.
    pub fn finalize(&self, queue_id: i64, status: QueueStatus) -> Result<(), StoreError> {
        let mut conn = self.dal.database.conn()?;
        diesel::update(task_queue::table.find(queue_id))
            .set((
                task_queue::status.eq(status.as_str()),
                task_queue::lease_expires_at.eq(None::<String>),
                task_queue::finished_at.eq(current_timestamp_string()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Flags a non-terminal entry as cancelled. In-flight executions are not
    /// interrupted; the runner observes the flag after the child exits.
    pub fn cancel(&self, queue_id: i64) -> Result<bool, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let affected = diesel::update(
            task_queue::table
                .find(queue_id)
                .filter(task_queue::status.eq_any(["queued", "running"])),
        )
        .set(task_queue::status.eq(QueueStatus::Cancelled.as_str()))
        .execute(&mut conn)?;
        Ok(affected > 0)
    }

    /// Records a fan-out row for later processing.
    pub fn record_fanout(&self, fanout: &NewFanout) -> Result<i64, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row: FanoutRow = diesel::insert_into(task_fanout::table)
            .values(NewFanoutRow::from_new(fanout, current_timestamp_string()))
            .get_result(&mut conn)?;
        Ok(row.fanout_id)
    }

    /// Fan-out rows attached to a parent, processed or not.
    pub fn fanouts_for(&self, parent_queue_id: i64) -> Result<Vec<FanoutRecord>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let rows: Vec<FanoutRow> = task_fanout::table
            .filter(task_fanout::parent_queue_id.eq(parent_queue_id))
            .order(task_fanout::fanout_id.asc())
            .select(FanoutRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Processes every unprocessed fan-out row of a completed parent:
    /// enqueues each child (registering an ephemeral definition for inline
    /// targets) and marks the row processed, atomically.
    pub fn process_fanouts(&self, parent_queue_id: i64) -> Result<Vec<EnqueueOutcome>, StoreError> {
        let mut conn = self.dal.database.conn()?;

        let outcomes = conn.immediate_transaction::<Vec<EnqueueOutcome>, DieselError, _>(|conn| {
            let pending: Vec<FanoutRow> = task_fanout::table
                .filter(task_fanout::parent_queue_id.eq(parent_queue_id))
                .filter(task_fanout::processed.eq(false))
                .order(task_fanout::fanout_id.asc())
                .select(FanoutRow::as_select())
                .load(conn)?;

            let mut outcomes = Vec::with_capacity(pending.len());
            for fanout_row in pending {
                let fanout: FanoutRecord = fanout_row.into();
                let child_task_id = match &fanout.target {
                    FanoutTarget::Existing { task_id } => task_id.clone(),
                    FanoutTarget::Inline {
                        kind,
                        interpreter,
                        code,
                        timeout_seconds,
                    } => {
                        let ephemeral_id = format!(
                            "inline_{}_{}_{:04x}",
                            parent_queue_id,
                            fanout.fanout_id,
                            rand::random::<u16>()
                        );
                        let now = current_timestamp_string();
                        diesel::insert_into(tasks::table)
                            .values((
                                tasks::task_id.eq(&ephemeral_id),
                                tasks::kind.eq(kind.as_str()),
                                tasks::interpreter.eq(interpreter.as_str()),
                                tasks::code.eq(code),
                                tasks::default_parameters.eq("{}"),
                                tasks::environment_overrides.eq("{}"),
                                tasks::timeout_seconds.eq(*timeout_seconds),
                                tasks::enabled.eq(true),
                                tasks::created_at.eq(&now),
                                tasks::updated_at.eq(&now),
                            ))
                            .execute(conn)?;
                        ephemeral_id
                    }
                };

                let request_id = Uuid::new_v4();
                let row: QueueRow = diesel::insert_into(task_queue::table)
                    .values(new_queue_row(
                        &request_id,
                        &child_task_id,
                        &fanout.parameters,
                        current_timestamp_string(),
                    ))
                    .get_result(conn)?;

                diesel::update(task_fanout::table.find(fanout.fanout_id))
                    .set(task_fanout::processed.eq(true))
                    .execute(conn)?;

                outcomes.push(EnqueueOutcome {
                    queue_id: row.queue_id,
                    request_id,
                    status: QueueStatus::Queued,
                    is_duplicate: false,
                });
            }

            Ok(outcomes)
        })?;

        if !outcomes.is_empty() {
            debug!(
                parent_queue_id,
                children = outcomes.len(),
                "Processed fan-out records"
            );
        }
        Ok(outcomes)
    }

    /// Number of rows currently in `queued`.
    pub fn queued_count(&self) -> Result<i64, StoreError> {
        let mut conn = self.dal.database.conn()?;
        Ok(task_queue::table
            .filter(task_queue::status.eq("queued"))
            .count()
            .get_result(&mut conn)?)
    }
}
