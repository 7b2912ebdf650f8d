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

//! Task definitions: the catalog of runnable work.
//!
//! A [`TaskDefinition`] names a kind (how to invoke it), the code or script
//! path, default parameters, and execution limits. Definitions are created by
//! bootstrap seeding or dynamically by tasks themselves, are mutable, and are
//! never destroyed implicitly; disabling a task cancels future executions
//! without deleting history.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::schema::tasks;
use crate::models::{current_timestamp_string, string_to_datetime};

/// How a task's `code` field is interpreted and invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// `code` is a single command template run through the platform shell;
    /// `{name}` placeholders substitute from merged parameters.
    Shell,
    /// `code` is an interpreter source snippet, written to a temp file.
    InterpretedInline,
    /// `code` is a script path, resolved relative to the runner binary.
    InterpretedFile,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Shell => "shell",
            TaskKind::InterpretedInline => "interpreted_inline",
            TaskKind::InterpretedFile => "interpreted_file",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(TaskKind::Shell),
            "interpreted_inline" => Ok(TaskKind::InterpretedInline),
            "interpreted_file" => Ok(TaskKind::InterpretedFile),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// Interpreter used by the interpreted kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpreter {
    Python,
    Typescript,
    Sh,
}

impl Interpreter {
    /// The program used to run a script of this interpreter.
    pub fn command(&self) -> &'static str {
        match self {
            Interpreter::Python => "python3",
            Interpreter::Typescript => "tsx",
            Interpreter::Sh => "sh",
        }
    }

    /// File extension for inline snippets written to temp files.
    pub fn extension(&self) -> &'static str {
        match self {
            Interpreter::Python => ".py",
            Interpreter::Typescript => ".ts",
            Interpreter::Sh => ".sh",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interpreter::Python => "python",
            Interpreter::Typescript => "typescript",
            Interpreter::Sh => "sh",
        }
    }
}

impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interpreter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Interpreter::Python),
            "typescript" => Ok(Interpreter::Typescript),
            "sh" => Ok(Interpreter::Sh),
            other => Err(format!("unknown interpreter: {other}")),
        }
    }
}

/// A registered task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    pub kind: TaskKind,
    pub interpreter: Interpreter,
    pub code: String,
    pub default_parameters: Value,
    pub working_directory: Option<String>,
    pub environment_overrides: BTreeMap<String, String>,
    pub timeout_seconds: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering or replacing a task definition.
#[derive(Debug, Clone)]
pub struct NewTaskDefinition {
    pub task_id: String,
    pub kind: TaskKind,
    pub interpreter: Interpreter,
    pub code: String,
    pub default_parameters: Value,
    pub working_directory: Option<String>,
    pub environment_overrides: BTreeMap<String, String>,
    pub timeout_seconds: i32,
    pub enabled: bool,
}

impl NewTaskDefinition {
    /// A shell task with defaults: 300 s timeout, enabled, no overrides.
    pub fn shell(task_id: impl Into<String>, code: impl Into<String>) -> Self {
        NewTaskDefinition {
            task_id: task_id.into(),
            kind: TaskKind::Shell,
            interpreter: Interpreter::Sh,
            code: code.into(),
            default_parameters: Value::Object(Default::default()),
            working_directory: None,
            environment_overrides: BTreeMap::new(),
            timeout_seconds: 300,
            enabled: true,
        }
    }

    /// An inline interpreted task with defaults.
    pub fn inline(
        task_id: impl Into<String>,
        interpreter: Interpreter,
        code: impl Into<String>,
    ) -> Self {
        NewTaskDefinition {
            task_id: task_id.into(),
            kind: TaskKind::InterpretedInline,
            interpreter,
            code: code.into(),
            default_parameters: Value::Object(Default::default()),
            working_directory: None,
            environment_overrides: BTreeMap::new(),
            timeout_seconds: 300,
            enabled: true,
        }
    }

    pub fn with_default_parameters(mut self, parameters: Value) -> Self {
        self.default_parameters = parameters;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: i32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

// ============================================================================
// SQLite row models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    pub task_id: String,
    pub kind: String,
    pub interpreter: String,
    pub code: String,
    pub default_parameters: String,
    pub working_directory: Option<String>,
    pub environment_overrides: String,
    pub timeout_seconds: i32,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    pub task_id: String,
    pub kind: String,
    pub interpreter: String,
    pub code: String,
    pub default_parameters: String,
    pub working_directory: Option<String>,
    pub environment_overrides: String,
    pub timeout_seconds: i32,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TaskRow> for TaskDefinition {
    fn from(row: TaskRow) -> Self {
        TaskDefinition {
            task_id: row.task_id,
            kind: row.kind.parse().expect("Invalid task kind in database"),
            interpreter: row
                .interpreter
                .parse()
                .expect("Invalid interpreter in database"),
            code: row.code,
            default_parameters: serde_json::from_str(&row.default_parameters)
                .expect("Invalid JSON in database"),
            working_directory: row.working_directory,
            environment_overrides: serde_json::from_str(&row.environment_overrides)
                .expect("Invalid JSON in database"),
            timeout_seconds: row.timeout_seconds,
            enabled: row.enabled,
            created_at: string_to_datetime(&row.created_at)
                .expect("Invalid timestamp in database"),
            updated_at: string_to_datetime(&row.updated_at)
                .expect("Invalid timestamp in database"),
        }
    }
}

impl From<&NewTaskDefinition> for NewTaskRow {
    fn from(def: &NewTaskDefinition) -> Self {
        let now = current_timestamp_string();
        NewTaskRow {
            task_id: def.task_id.clone(),
            kind: def.kind.as_str().to_string(),
            interpreter: def.interpreter.as_str().to_string(),
            code: def.code.clone(),
            default_parameters: def.default_parameters.to_string(),
            working_directory: def.working_directory.clone(),
            environment_overrides: serde_json::to_string(&def.environment_overrides)
                .unwrap_or_else(|_| "{}".to_string()),
            timeout_seconds: def.timeout_seconds,
            enabled: def.enabled,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}
