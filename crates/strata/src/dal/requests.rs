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

//! Task request operations: idempotent submission with dependency edges,
//! priority-ordered claiming, terminal bookkeeping, and blocked→pending
//! resolution.

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sqlite::SqliteConnection;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{with_write_retry, DAL};
use crate::database::schema::{request_dependencies, task_requests};
use crate::error::{RequestError, StoreError};
use crate::models::request::{
    clamp_priority, NewDependencyRow, NewRequestRow, NewTaskRequest, RequestRow, RequestStatus,
    TaskRequest,
};
use crate::models::{blob_to_uuid, current_timestamp_string, datetime_to_string, uuid_to_blob};

/// Errors stored on failed requests are truncated to this length.
const MAX_STORED_ERROR: usize = 2000;

pub struct RequestDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> RequestDAL<'a> {
    /// Submits a request. The initial status is `blocked` iff it carries any
    /// DEPENDS_ON edge, else `pending`. Submitting an id that already exists
    /// fails with [`RequestError::AlreadyExists`]; dependency edges that
    /// would close a cycle fail with [`RequestError::DependencyCycle`].
    pub fn submit(&self, request: &NewTaskRequest) -> Result<TaskRequest, RequestError> {
        let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);
        let mut conn = self.dal.database.conn().map_err(StoreError::from)?;

        let submitted = conn
            .immediate_transaction::<Result<RequestRow, RequestError>, DieselError, _>(|conn| {
                let existing: Option<RequestRow> = task_requests::table
                    .find(uuid_to_blob(&request_id))
                    .select(RequestRow::as_select())
                    .first(conn)
                    .optional()?;
                if existing.is_some() {
                    return Ok(Err(RequestError::AlreadyExists(request_id)));
                }

                for dependency in &request.depends_on {
                    let known: Option<Vec<u8>> = task_requests::table
                        .find(uuid_to_blob(dependency))
                        .select(task_requests::request_id)
                        .first(conn)
                        .optional()?;
                    if known.is_none() {
                        return Ok(Err(RequestError::UnknownDependency {
                            request_id,
                            dependency: *dependency,
                        }));
                    }
                }

                if !request.depends_on.is_empty()
                    && would_cycle(conn, request_id, &request.depends_on)?
                {
                    return Ok(Err(RequestError::DependencyCycle(request_id)));
                }

                let status = if request.depends_on.is_empty() {
                    RequestStatus::Pending
                } else {
                    RequestStatus::Blocked
                };

                diesel::insert_into(task_requests::table)
                    .values(NewRequestRow {
                        request_id: uuid_to_blob(&request_id),
                        task_id: request.task_id.clone(),
                        parameters: request.parameters.to_string(),
                        priority: clamp_priority(request.priority),
                        requester: request.requester.clone(),
                        status: status.as_str().to_string(),
                        triggered_by: request.triggered_by.clone(),
                        created_at: current_timestamp_string(),
                    })
                    .execute(conn)?;

                for dependency in &request.depends_on {
                    diesel::insert_into(request_dependencies::table)
                        .values(NewDependencyRow {
                            request_id: uuid_to_blob(&request_id),
                            depends_on: uuid_to_blob(dependency),
                        })
                        .execute(conn)?;
                }

                let row = task_requests::table
                    .find(uuid_to_blob(&request_id))
                    .select(RequestRow::as_select())
                    .first(conn)?;
                Ok(Ok(row))
            })
            .map_err(StoreError::from)??;

        info!(
            request_id = %request_id,
            task_id = %request.task_id,
            status = %submitted.status,
            "Submitted task request"
        );
        Ok(submitted.into())
    }

    /// Atomically claims the next dispatchable request: highest priority,
    /// then earliest created, among `pending` requests whose every
    /// dependency is `done`.
    pub fn claim_next(&self, worker: &str) -> Result<Option<TaskRequest>, StoreError> {
        let row = with_write_retry(|| {
            let mut conn = self.dal.database.conn()?;
            conn.immediate_transaction::<Option<RequestRow>, DieselError, _>(|conn| {
                let candidates: Vec<RequestRow> = task_requests::table
                    .filter(task_requests::status.eq("pending"))
                    .order((
                        task_requests::priority.desc(),
                        task_requests::created_at.asc(),
                    ))
                    .select(RequestRow::as_select())
                    .load(conn)?;

                for candidate in candidates {
                    if unmet_dependency_count(conn, &candidate.request_id)? > 0 {
                        continue;
                    }

                    diesel::update(task_requests::table.find(&candidate.request_id))
                        .set((
                            task_requests::status.eq("claimed"),
                            task_requests::claimed_by.eq(worker),
                            task_requests::claimed_at
                                .eq(datetime_to_string(&Utc::now())),
                        ))
                        .execute(conn)?;

                    let row = task_requests::table
                        .find(&candidate.request_id)
                        .select(RequestRow::as_select())
                        .first(conn)?;
                    return Ok(Some(row));
                }

                Ok(None)
            })
            .map_err(StoreError::from)
        })?;

        if let Some(ref row) = row {
            debug!(request_id = %blob_to_uuid(&row.request_id).expect("Invalid UUID in database"), worker, "Claimed request");
        }
        Ok(row.map(Into::into))
    }

    pub fn get(&self, request_id: Uuid) -> Result<Option<TaskRequest>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row: Option<RequestRow> = task_requests::table
            .find(uuid_to_blob(&request_id))
            .select(RequestRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    /// Direct DEPENDS_ON targets of a request.
    pub fn dependencies_of(&self, request_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let blobs: Vec<Vec<u8>> = request_dependencies::table
            .filter(request_dependencies::request_id.eq(uuid_to_blob(&request_id)))
            .select(request_dependencies::depends_on)
            .load(&mut conn)?;
        blobs
            .iter()
            .map(|b| blob_to_uuid(b).map_err(StoreError::from))
            .collect()
    }

    pub fn mark_executing(&self, request_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.dal.database.conn()?;
        diesel::update(task_requests::table.find(uuid_to_blob(&request_id)))
            .set(task_requests::status.eq("executing"))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn mark_done(&self, request_id: Uuid, result_ref: &str) -> Result<(), StoreError> {
        let mut conn = self.dal.database.conn()?;
        diesel::update(task_requests::table.find(uuid_to_blob(&request_id)))
            .set((
                task_requests::status.eq("done"),
                task_requests::finished_at.eq(current_timestamp_string()),
                task_requests::result_ref.eq(result_ref),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn mark_failed(&self, request_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut conn = self.dal.database.conn()?;
        let truncated: String = error.chars().take(MAX_STORED_ERROR).collect();
        diesel::update(task_requests::table.find(uuid_to_blob(&request_id)))
            .set((
                task_requests::status.eq("failed"),
                task_requests::finished_at.eq(current_timestamp_string()),
                task_requests::error.eq(truncated),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Moves `blocked` dependents of a completed request to `pending` when
    /// all of their dependencies are `done`. Returns the unblocked ids.
    pub fn resolve_blocked_for(&self, completed: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let unblocked = conn.immediate_transaction::<Vec<Uuid>, DieselError, _>(|conn| {
            let dependents: Vec<Vec<u8>> = request_dependencies::table
                .filter(request_dependencies::depends_on.eq(uuid_to_blob(&completed)))
                .select(request_dependencies::request_id)
                .load(conn)?;
            resolve_candidates(conn, dependents)
        })?;

        if !unblocked.is_empty() {
            info!(count = unblocked.len(), "Unblocked dependent requests");
        }
        Ok(unblocked)
    }

    /// Defensive sweep: re-evaluates every `blocked` request. Idempotent;
    /// moving an already-pending row is a no-op.
    pub fn resolve_all_blocked(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        conn.immediate_transaction::<Vec<Uuid>, DieselError, _>(|conn| {
            let blocked: Vec<Vec<u8>> = task_requests::table
                .filter(task_requests::status.eq("blocked"))
                .select(task_requests::request_id)
                .load(conn)?;
            resolve_candidates(conn, blocked)
        })
        .map_err(Into::into)
    }

    /// Cancels a `pending` or `blocked` request. Later states are refused.
    pub fn cancel(&self, request_id: Uuid) -> Result<TaskRequest, RequestError> {
        let mut conn = self.dal.database.conn().map_err(StoreError::from)?;

        let cancelled = conn
            .immediate_transaction::<Result<RequestRow, RequestError>, DieselError, _>(|conn| {
                let row: Option<RequestRow> = task_requests::table
                    .find(uuid_to_blob(&request_id))
                    .select(RequestRow::as_select())
                    .first(conn)
                    .optional()?;
                let Some(row) = row else {
                    return Ok(Err(RequestError::NotFound(request_id)));
                };

                let status: RequestStatus =
                    row.status.parse().unwrap_or(RequestStatus::Pending);
                if !status.is_cancellable() {
                    return Ok(Err(RequestError::CannotCancel { request_id, status }));
                }

                diesel::update(task_requests::table.find(uuid_to_blob(&request_id)))
                    .set((
                        task_requests::status.eq("cancelled"),
                        task_requests::finished_at.eq(current_timestamp_string()),
                        task_requests::error.eq("Cancelled by user"),
                    ))
                    .execute(conn)?;

                let row = task_requests::table
                    .find(uuid_to_blob(&request_id))
                    .select(RequestRow::as_select())
                    .first(conn)?;
                Ok(Ok(row))
            })
            .map_err(StoreError::from)??;

        info!(request_id = %request_id, "Cancelled request");
        Ok(cancelled.into())
    }

    /// Requests by status, newest first.
    pub fn list(&self, status: Option<RequestStatus>) -> Result<Vec<TaskRequest>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let mut query = task_requests::table.into_boxed();
        if let Some(status) = status {
            query = query.filter(task_requests::status.eq(status.as_str()));
        }
        let rows: Vec<RequestRow> = query
            .order(task_requests::created_at.desc())
            .select(RequestRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Requests synthesized by a cascade rule, newest first.
    pub fn triggered_by(
        &self,
        rule_id: &str,
        limit: i64,
    ) -> Result<Vec<TaskRequest>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let rows: Vec<RequestRow> = task_requests::table
            .filter(task_requests::triggered_by.eq(rule_id))
            .order(task_requests::created_at.desc())
            .limit(limit)
            .select(RequestRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Request counts per status.
    pub fn stats(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        Ok(task_requests::table
            .group_by(task_requests::status)
            .select((task_requests::status, diesel::dsl::count_star()))
            .load(&mut conn)?)
    }
}

fn unmet_dependency_count(
    conn: &mut SqliteConnection,
    request_blob: &[u8],
) -> Result<i64, DieselError> {
    let dep_blobs: Vec<Vec<u8>> = request_dependencies::table
        .filter(request_dependencies::request_id.eq(request_blob))
        .select(request_dependencies::depends_on)
        .load(conn)?;
    if dep_blobs.is_empty() {
        return Ok(0);
    }
    task_requests::table
        .filter(task_requests::request_id.eq_any(&dep_blobs))
        .filter(task_requests::status.ne("done"))
        .count()
        .get_result(conn)
}

fn resolve_candidates(
    conn: &mut SqliteConnection,
    candidates: Vec<Vec<u8>>,
) -> Result<Vec<Uuid>, DieselError> {
    let mut unblocked = Vec::new();
    for candidate in candidates {
        let status: Option<String> = task_requests::table
            .find(&candidate)
            .select(task_requests::status)
            .first(conn)
            .optional()?;
        if status.as_deref() != Some("blocked") {
            continue;
        }
        if unmet_dependency_count(conn, &candidate)? == 0 {
            diesel::update(task_requests::table.find(&candidate))
                .set(task_requests::status.eq("pending"))
                .execute(conn)?;
            if let Ok(id) = blob_to_uuid(&candidate) {
                unblocked.push(id);
            }
        }
    }
    Ok(unblocked)
}

/// Detects whether adding `new_edges` from `request_id` closes a cycle in
/// the dependency graph.
fn would_cycle(
    conn: &mut SqliteConnection,
    request_id: Uuid,
    new_edges: &[Uuid],
) -> Result<bool, DieselError> {
    let existing: Vec<(Vec<u8>, Vec<u8>)> = request_dependencies::table
        .select((
            request_dependencies::request_id,
            request_dependencies::depends_on,
        ))
        .load(conn)?;

    let mut graph: DiGraphMap<Uuid, ()> = DiGraphMap::new();
    for (from, to) in &existing {
        if let (Ok(from), Ok(to)) = (blob_to_uuid(from), blob_to_uuid(to)) {
            graph.add_edge(from, to, ());
        }
    }
    for target in new_edges {
        graph.add_edge(request_id, *target, ());
    }

    Ok(petgraph::algo::is_cyclic_directed(&graph))
}
