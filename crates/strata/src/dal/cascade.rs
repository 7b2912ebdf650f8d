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

//! Cascade rule management and firing.
//!
//! Firing is idempotent per (rule, source): the synthesized request id is a
//! UUIDv5 of the pair, so replaying the same source event trips the unique
//! request-id constraint instead of duplicating work.

use diesel::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::DAL;
use crate::database::schema::cascade_rules;
use crate::error::{RequestError, StoreError};
use crate::models::cascade::{
    CascadeRule, CascadeRuleRow, NewCascadeRule, NewCascadeRuleRow, SourceEvent,
};
use crate::models::current_timestamp_string;
use crate::models::request::NewTaskRequest;

/// Namespace for deriving cascade request ids.
const CASCADE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8a, 0x6e, 0x1f, 0x52, 0x1d, 0x0b, 0x4a, 0x7e, 0x9c, 0x31, 0x5b, 0x2d, 0x84, 0xf0, 0x66,
    0x27,
]);

static SOURCE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$source\.([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

pub struct CascadeDAL<'a> {
    pub(super) dal: &'a DAL,
}

impl<'a> CascadeDAL<'a> {
    /// Creates or updates a rule. The parameter template must be valid JSON
    /// (before substitution).
    pub fn upsert(&self, rule: &NewCascadeRule) -> Result<CascadeRule, RequestError> {
        if let Err(err) = serde_json::from_str::<serde_json::Value>(&rule.parameter_template) {
            return Err(RequestError::InvalidTemplate(err.to_string()));
        }

        let mut conn = self.dal.database.conn().map_err(StoreError::from)?;
        let row = NewCascadeRuleRow {
            rule_id: rule.rule_id.clone(),
            description: rule.description.clone(),
            source_kind: rule.source_kind.clone(),
            task_id: rule.task_id.clone(),
            parameter_template: rule.parameter_template.clone(),
            priority: rule.priority,
            enabled: rule.enabled,
            created_at: current_timestamp_string(),
        };

        diesel::insert_into(cascade_rules::table)
            .values(&row)
            .on_conflict(cascade_rules::rule_id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .map_err(StoreError::from)?;

        debug!(rule_id = %rule.rule_id, "Cascade rule registered");
        self.get(&rule.rule_id)?
            .ok_or_else(|| StoreError::Database(diesel::result::Error::NotFound).into())
    }

    pub fn get(&self, rule_id: &str) -> Result<Option<CascadeRule>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let row: Option<CascadeRuleRow> = cascade_rules::table
            .find(rule_id)
            .select(CascadeRuleRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Into::into))
    }

    pub fn list(&self, enabled_only: bool) -> Result<Vec<CascadeRule>, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let mut query = cascade_rules::table.into_boxed();
        if enabled_only {
            query = query.filter(cascade_rules::enabled.eq(true));
        }
        let rows: Vec<CascadeRuleRow> = query
            .order(cascade_rules::rule_id.asc())
            .select(CascadeRuleRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Enables or disables a rule. Returns false for unknown ids.
    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<bool, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let affected = diesel::update(cascade_rules::table.find(rule_id))
            .set(cascade_rules::enabled.eq(enabled))
            .execute(&mut conn)?;
        Ok(affected > 0)
    }

    /// Deletes a rule. Requests it triggered are left untouched.
    pub fn delete(&self, rule_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.dal.database.conn()?;
        let affected =
            diesel::delete(cascade_rules::table.find(rule_id)).execute(&mut conn)?;
        Ok(affected > 0)
    }

    /// Evaluates a source event against every enabled rule whose
    /// `source_kind` matches (or is unset), synthesizing one request per
    /// matching rule. Returns the ids of newly created requests; replayed
    /// events dedupe via request-id uniqueness.
    pub fn fire(&self, event: &SourceEvent) -> Result<Vec<Uuid>, RequestError> {
        let rules = self.list(true)?;
        let mut created = Vec::new();

        for rule in rules {
            if let Some(kind) = &rule.source_kind {
                if kind != &event.kind {
                    continue;
                }
            }

            let substituted = substitute_template(&rule.parameter_template, event);
            let parameters: serde_json::Value = match serde_json::from_str(&substituted) {
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        rule_id = %rule.rule_id,
                        %err,
                        "Cascade template did not substitute to valid JSON; skipping rule"
                    );
                    continue;
                }
            };

            let request_id = Uuid::new_v5(
                &CASCADE_NAMESPACE,
                format!("{}:{}", rule.rule_id, event.source_id).as_bytes(),
            );
            let request = NewTaskRequest {
                request_id: Some(request_id),
                task_id: rule.task_id.clone(),
                parameters,
                priority: rule.priority,
                requester: format!("trigger:{}", rule.rule_id),
                depends_on: Vec::new(),
                triggered_by: Some(rule.rule_id.clone()),
            };

            match self.dal.requests().submit(&request) {
                Ok(submitted) => created.push(submitted.request_id),
                Err(RequestError::AlreadyExists(_)) => {
                    debug!(
                        rule_id = %rule.rule_id,
                        source_id = %event.source_id,
                        "Cascade request already exists; suppressed duplicate"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(created)
    }
}

/// Replaces `$source.<field>` placeholders with values from the event.
/// `source_id` and `kind` are always available; string values substitute
/// raw, other values in their JSON rendering. Unknown fields are left
/// in place.
fn substitute_template(template: &str, event: &SourceEvent) -> String {
    SOURCE_PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let field = &caps[1];
            if field == "source_id" && !event.fields.contains_key("source_id") {
                return event.source_id.clone();
            }
            if field == "kind" && !event.fields.contains_key("kind") {
                return event.kind.clone();
            }
            match event.fields.get(field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
