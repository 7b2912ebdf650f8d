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

//! Idempotent, re-runnable schema management.
//!
//! Every step probes before it writes: tables and indexes are created with
//! `IF NOT EXISTS`, column additions check `PRAGMA table_info` first, and
//! backfills only touch rows that still need them. Running the whole thing
//! against a current store is a no-op apart from the version upsert.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{current_timestamp_string, uuid_to_blob};

pub const SCHEMA_NAME: &str = "core";
pub const SCHEMA_VERSION: &str = "2.0.0";

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    interpreter TEXT NOT NULL DEFAULT 'python',
    code TEXT NOT NULL,
    default_parameters TEXT NOT NULL DEFAULT '{}',
    working_directory TEXT,
    environment_overrides TEXT NOT NULL DEFAULT '{}',
    timeout_seconds INTEGER NOT NULL DEFAULT 300,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_queue (
    queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id BLOB NOT NULL,
    task_id TEXT NOT NULL,
    parameters TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'queued',
    worker_id TEXT,
    lease_expires_at TEXT,
    enqueued_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS task_fanout (
    fanout_id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_queue_id INTEGER NOT NULL,
    child_task_id TEXT,
    child_parameters TEXT NOT NULL DEFAULT '{}',
    inline_kind TEXT,
    inline_interpreter TEXT,
    inline_code TEXT,
    inline_timeout_seconds INTEGER,
    processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS control_flags (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_stacks (
    stack_id BLOB PRIMARY KEY,
    request_id BLOB,
    status TEXT NOT NULL DEFAULT 'running',
    initial_task_id TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    trace TEXT,
    final_output TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS stack_queue (
    queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    stack_id BLOB NOT NULL,
    task_id TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    parent_queue_id INTEGER,
    sequence INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'queued',
    worker_id TEXT,
    lease_expires_at TEXT,
    parameters TEXT NOT NULL DEFAULT '{}',
    input_context TEXT NOT NULL DEFAULT '{}',
    output TEXT,
    output_context TEXT,
    pushed_tasks TEXT,
    error_message TEXT,
    enqueued_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS task_requests (
    request_id BLOB PRIMARY KEY,
    task_id TEXT NOT NULL,
    parameters TEXT NOT NULL DEFAULT '{}',
    priority INTEGER NOT NULL DEFAULT 100,
    requester TEXT NOT NULL DEFAULT 'unknown',
    status TEXT NOT NULL DEFAULT 'pending',
    claimed_by TEXT,
    claimed_at TEXT,
    finished_at TEXT,
    result_ref TEXT,
    error TEXT,
    triggered_by TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS request_dependencies (
    request_id BLOB NOT NULL,
    depends_on BLOB NOT NULL,
    PRIMARY KEY (request_id, depends_on)
);

CREATE TABLE IF NOT EXISTS cascade_rules (
    rule_id TEXT PRIMARY KEY,
    description TEXT,
    source_kind TEXT,
    task_id TEXT NOT NULL,
    parameter_template TEXT NOT NULL DEFAULT '{}',
    priority INTEGER NOT NULL DEFAULT 50,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_versions (
    schema_name TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    migrated_at TEXT NOT NULL,
    description TEXT
);
"#;

const CREATE_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_task_queue_request_id ON task_queue (request_id);
CREATE INDEX IF NOT EXISTS idx_task_queue_status ON task_queue (status, queue_id);
CREATE INDEX IF NOT EXISTS idx_task_fanout_parent ON task_fanout (parent_queue_id, processed);
CREATE UNIQUE INDEX IF NOT EXISTS idx_execution_stacks_request_id
    ON execution_stacks (request_id) WHERE request_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_stack_queue_stack ON stack_queue (stack_id, status, queue_id);
CREATE INDEX IF NOT EXISTS idx_task_requests_status_priority ON task_requests (status, priority);
CREATE INDEX IF NOT EXISTS idx_task_requests_requester ON task_requests (requester);
CREATE INDEX IF NOT EXISTS idx_task_requests_task_id ON task_requests (task_id);
CREATE INDEX IF NOT EXISTS idx_cascade_rules_enabled ON cascade_rules (enabled);
"#;

#[derive(QueryableByName)]
struct TableColumn {
    #[diesel(sql_type = Text, column_name = name)]
    name: String,
}

#[derive(QueryableByName)]
struct QueueRowId {
    #[diesel(sql_type = BigInt, column_name = queue_id)]
    queue_id: i64,
}

const DROP_TABLES: &str = r#"
DROP TABLE IF EXISTS task_fanout;
DROP TABLE IF EXISTS task_queue;
DROP TABLE IF EXISTS stack_queue;
DROP TABLE IF EXISTS execution_stacks;
DROP TABLE IF EXISTS request_dependencies;
DROP TABLE IF EXISTS task_requests;
DROP TABLE IF EXISTS cascade_rules;
DROP TABLE IF EXISTS control_flags;
DROP TABLE IF EXISTS schema_versions;
DROP TABLE IF EXISTS tasks;
"#;

/// Drops every table. Destroys data; `run` rebuilds from scratch.
pub fn reset(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.batch_execute(DROP_TABLES)?;
    Ok(())
}

/// Brings the store at `conn` up to the current schema. Safe to run any
/// number of times.
pub fn run(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.batch_execute(CREATE_TABLES)?;
    backfill_queue_request_ids(conn)?;
    conn.batch_execute(CREATE_INDEXES)?;
    seed_control_flags(conn)?;
    record_version(conn)?;
    debug!(version = SCHEMA_VERSION, "Schema migration complete");
    Ok(())
}

fn has_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, StoreError> {
    let columns: Vec<TableColumn> =
        diesel::sql_query(format!("PRAGMA table_info({table})")).load(conn)?;
    Ok(columns.iter().any(|c| c.name == column))
}

/// Stores created before idempotent enqueueing carried no `request_id`
/// column; add it and backfill a fresh UUID per row.
fn backfill_queue_request_ids(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    if !has_column(conn, "task_queue", "request_id")? {
        info!("Adding request_id column to task_queue");
        conn.batch_execute("ALTER TABLE task_queue ADD COLUMN request_id BLOB")?;
    }

    let missing: Vec<QueueRowId> =
        diesel::sql_query("SELECT queue_id FROM task_queue WHERE request_id IS NULL").load(conn)?;
    if missing.is_empty() {
        return Ok(());
    }

    info!(rows = missing.len(), "Backfilling queue request ids");
    for row in missing {
        diesel::sql_query("UPDATE task_queue SET request_id = ? WHERE queue_id = ?")
            .bind::<diesel::sql_types::Binary, _>(uuid_to_blob(&uuid::Uuid::new_v4()))
            .bind::<BigInt, _>(row.queue_id)
            .execute(conn)?;
    }
    Ok(())
}

fn seed_control_flags(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.batch_execute(
        "INSERT OR IGNORE INTO control_flags (key, value) VALUES ('kill_all', '0');
         INSERT OR IGNORE INTO control_flags (key, value) VALUES ('pause_new_tasks', '0');",
    )?;
    Ok(())
}

fn record_version(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    use crate::database::schema::schema_versions::dsl::*;

    let now = current_timestamp_string();
    diesel::insert_into(schema_versions)
        .values((
            schema_name.eq(SCHEMA_NAME),
            version.eq(SCHEMA_VERSION),
            migrated_at.eq(&now),
            description.eq(Some(
                "Task, queue, stack, request, and cascade schema for the Strata engine",
            )),
        ))
        .on_conflict(schema_name)
        .do_update()
        .set((version.eq(SCHEMA_VERSION), migrated_at.eq(&now)))
        .execute(conn)?;
    Ok(())
}
