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

//! Task definition catalog.

use diesel::prelude::*;
use tracing::debug;

use super::DAL;
use crate::database::schema::tasks;
use crate::error::StoreError;
use crate::models::task::{NewTaskDefinition, NewTaskRow, TaskDefinition, TaskRow};

pub struct TaskDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> TaskDAL<'a> {
    /// Registers a definition, replacing any existing one with the same id.
    pub fn upsert(&self, definition: &NewTaskDefinition) -> Result<TaskDefinition, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row = NewTaskRow::from(definition);

        diesel::insert_into(tasks::table)
            .values(&row)
            .on_conflict(tasks::task_id)
            .do_update()
            .set(&row)
            .execute(&mut conn)?;

        debug!(task_id = %definition.task_id, "Task definition registered");
        self.get(&definition.task_id)?
            .ok_or(diesel::result::Error::NotFound)
            .map_err(Into::into)
    }

    /// Looks up a definition by id.
    pub fn get(&self, id: &str) -> Result<Option<TaskDefinition>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row: Option<TaskRow> = tasks::table
            .find(id)
            .select(TaskRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    /// Lists the whole catalog, ordered by id.
    pub fn list(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let rows: Vec<TaskRow> = tasks::table
            .order(tasks::task_id.asc())
            .select(TaskRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Enables or disables a definition. Returns false when the id is
    /// unknown.
    pub fn set_enabled(&self, id: &str, is_enabled: bool) -> Result<bool, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let affected = diesel::update(tasks::table.find(id))
            .set((
                tasks::enabled.eq(is_enabled),
                tasks::updated_at.eq(crate::models::current_timestamp_string()),
            ))
            .execute(&mut conn)?;
        Ok(affected > 0)
    }
}
