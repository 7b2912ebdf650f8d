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

//! Error types for the Strata execution engine.
//!
//! Each subsystem surfaces its own error enum; the CLI collapses them into
//! `anyhow` at the edge. Failures of individual task executions are *not*
//! errors: they are encoded in [`crate::executor::ExecutionResult`] and the
//! status columns of the stores.

use thiserror::Error;
use uuid::Uuid;

use crate::models::request::RequestStatus;

/// Errors raised by the data access layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to check out a connection from the pool.
    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// Failed to open a direct connection.
    #[error("Connection error: {0}")]
    Connection(#[from] diesel::result::ConnectionError),

    /// A query or transaction failed.
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A UUID column contained bytes that are not a UUID.
    #[error("Invalid UUID in database: {0}")]
    Uuid(#[from] uuid::Error),

    /// A timestamp column contained text that is not RFC3339.
    #[error("Invalid timestamp in database: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// A JSON column contained text that does not parse.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A status column contained a value outside the state machine.
    #[error("Unknown status value: {0}")]
    UnknownStatus(String),
}

/// Errors raised when submitting, claiming, or cancelling task requests.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request {0} not found")]
    NotFound(Uuid),

    #[error("Request {0} already exists")]
    AlreadyExists(Uuid),

    /// Only `pending` and `blocked` requests are user-cancellable.
    #[error("Cannot cancel request {request_id} in state {status}")]
    CannotCancel {
        request_id: Uuid,
        status: RequestStatus,
    },

    /// The submitted DEPENDS_ON edges would close a cycle.
    #[error("Dependency cycle involving request {0}")]
    DependencyCycle(Uuid),

    #[error("Request {request_id} depends on unknown request {dependency}")]
    UnknownDependency { request_id: Uuid, dependency: Uuid },

    #[error("Invalid parameter template: {0}")]
    InvalidTemplate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the queue runner, stack runner, and request processor.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Stack {0} not found")]
    StackNotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Request(#[from] RequestError),
}
