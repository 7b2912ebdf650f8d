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

//! Process-wide control flags.
//!
//! `kill_all` and `pause_new_tasks` live in the store and are re-read before
//! every claim, so flipping them affects all workers on their next
//! invocation without restarting anything.

use diesel::prelude::*;

use super::DAL;
use crate::database::schema::control_flags::dsl::*;
use crate::error::StoreError;

pub const KILL_ALL: &str = "kill_all";
pub const PAUSE_NEW_TASKS: &str = "pause_new_tasks";

pub struct ControlDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> ControlDAL<'a> {
    /// Reads a flag; absent flags read as unset.
    pub fn flag(&self, flag_key: &str) -> Result<bool, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let stored: Option<String> = control_flags
            .filter(key.eq(flag_key))
            .select(value)
            .first(&mut conn)
            .optional()?;
        Ok(stored.as_deref() == Some("1"))
    }

    /// Sets or clears a flag.
    pub fn set_flag(&self, flag_key: &str, enabled: bool) -> Result<(), StoreError> {
        let mut conn = self.dal.database.conn()?;
        let stored = if enabled { "1" } else { "0" };
        diesel::insert_into(control_flags)
            .values((key.eq(flag_key), value.eq(stored)))
            .on_conflict(key)
            .do_update()
            .set(value.eq(stored))
            .execute(&mut conn)?;
        Ok(())
    }
}
