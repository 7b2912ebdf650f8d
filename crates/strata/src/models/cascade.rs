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

//! Cascade rules: declarative mappings from source events to requests.
//!
//! When a new source entity appears, every enabled rule whose `source_kind`
//! matches (or is unset) synthesizes a task request, substituting
//! `$source.<field>` placeholders in the rule's parameter template.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::schema::cascade_rules;
use crate::models::string_to_datetime;

/// Default priority for cascade-created requests.
pub const DEFAULT_RULE_PRIORITY: i32 = 50;

/// A reactive rule that turns source events into task requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeRule {
    pub rule_id: String,
    pub description: Option<String>,
    /// Match sources with this kind; `None` matches all kinds.
    pub source_kind: Option<String>,
    pub task_id: String,
    /// JSON template with `$source.<field>` placeholders.
    pub parameter_template: String,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating or updating a rule.
#[derive(Debug, Clone)]
pub struct NewCascadeRule {
    pub rule_id: String,
    pub description: Option<String>,
    pub source_kind: Option<String>,
    pub task_id: String,
    pub parameter_template: String,
    pub priority: i32,
    pub enabled: bool,
}

impl NewCascadeRule {
    pub fn new(rule_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        NewCascadeRule {
            rule_id: rule_id.into(),
            description: Some(format!("Cascade rule for {task_id}")),
            source_kind: None,
            task_id,
            parameter_template: r#"{"source_id": "$source.source_id"}"#.to_string(),
            priority: DEFAULT_RULE_PRIORITY,
            enabled: true,
        }
    }
}

/// The external event surface: a new source entity appeared.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub source_id: String,
    pub kind: String,
    /// Fields available for `$source.<field>` substitution.
    pub fields: Map<String, Value>,
}

impl SourceEvent {
    pub fn new(source_id: impl Into<String>, kind: impl Into<String>) -> Self {
        SourceEvent {
            source_id: source_id.into(),
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

// ============================================================================
// SQLite row models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cascade_rules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CascadeRuleRow {
    pub rule_id: String,
    pub description: Option<String>,
    pub source_kind: Option<String>,
    pub task_id: String,
    pub parameter_template: String,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: String,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = cascade_rules)]
pub struct NewCascadeRuleRow {
    pub rule_id: String,
    pub description: Option<String>,
    pub source_kind: Option<String>,
    pub task_id: String,
    pub parameter_template: String,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: String,
}

impl From<CascadeRuleRow> for CascadeRule {
    fn from(row: CascadeRuleRow) -> Self {
        CascadeRule {
            rule_id: row.rule_id,
            description: row.description,
            source_kind: row.source_kind,
            task_id: row.task_id,
            parameter_template: row.parameter_template,
            priority: row.priority,
            enabled: row.enabled,
            created_at: string_to_datetime(&row.created_at)
                .expect("Invalid timestamp in database"),
        }
    }
}
