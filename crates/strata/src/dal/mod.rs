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

//! Data Access Layer for the task store.
//!
//! Claim operations are single conditional updates inside `IMMEDIATE`
//! transactions. SQLite has no `FOR UPDATE SKIP LOCKED`; the immediate
//! transaction acquires the write lock up front, serializing concurrent
//! claimers so each row is claimed exactly once.

use diesel::result::{DatabaseErrorKind, Error as DieselError};

pub mod cascade;
pub mod control;
pub mod queue;
pub mod requests;
pub mod stacks;
pub mod tasks;

use crate::database::Database;
use crate::error::StoreError;

use cascade::CascadeDAL;
use control::ControlDAL;
use queue::QueueDAL;
use requests::RequestDAL;
use stacks::StackDAL;
use tasks::TaskDAL;

/// The main Data Access Layer struct.
#[derive(Clone)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    /// Creates a new DAL over the given database.
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Task definition catalog operations.
    pub fn tasks(&self) -> TaskDAL {
        TaskDAL { dal: self }
    }

    /// Single-shot queue operations.
    pub fn queue(&self) -> QueueDAL {
        QueueDAL { dal: self }
    }

    /// Execution stack operations.
    pub fn stacks(&self) -> StackDAL {
        StackDAL { dal: self }
    }

    /// Task request operations.
    pub fn requests(&self) -> RequestDAL {
        RequestDAL { dal: self }
    }

    /// Cascade rule operations.
    pub fn cascade(&self) -> CascadeDAL {
        CascadeDAL { dal: self }
    }

    /// Control flag operations.
    pub fn control(&self) -> ControlDAL {
        ControlDAL { dal: self }
    }
}

fn is_transient(err: &StoreError) -> bool {
    match err {
        StoreError::Database(DieselError::DatabaseError(kind, info)) => {
            matches!(kind, DatabaseErrorKind::Unknown)
                && info.message().contains("database is locked")
        }
        _ => false,
    }
}

/// Runs a store operation, retrying exactly once on a transient write
/// conflict. Persistent errors surface to the caller.
pub(crate) fn with_write_retry<T>(
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    match op() {
        Err(err) if is_transient(&err) => {
            tracing::debug!("Retrying store operation after write conflict");
            op()
        }
        other => other,
    }
}
