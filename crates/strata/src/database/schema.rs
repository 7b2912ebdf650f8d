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

//! Diesel table definitions for the task store.
//!
//! SQLite storage conventions: UUIDs as BLOB, timestamps as RFC3339 TEXT
//! (millisecond precision, UTC, `Z` suffix, so lexicographic order equals
//! chronological order), JSON payloads as TEXT, booleans as INTEGER 0/1.

diesel::table! {
    tasks (task_id) {
        task_id -> Text,
        kind -> Text,
        interpreter -> Text,
        code -> Text,
        default_parameters -> Text,
        working_directory -> Nullable<Text>,
        environment_overrides -> Text,
        timeout_seconds -> Integer,
        enabled -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    task_queue (queue_id) {
        queue_id -> BigInt,
        request_id -> Binary,
        task_id -> Text,
        parameters -> Text,
        status -> Text,
        worker_id -> Nullable<Text>,
        lease_expires_at -> Nullable<Text>,
        enqueued_at -> Text,
        started_at -> Nullable<Text>,
        finished_at -> Nullable<Text>,
    }
}

diesel::table! {
    task_fanout (fanout_id) {
        fanout_id -> BigInt,
        parent_queue_id -> BigInt,
        child_task_id -> Nullable<Text>,
        child_parameters -> Text,
        inline_kind -> Nullable<Text>,
        inline_interpreter -> Nullable<Text>,
        inline_code -> Nullable<Text>,
        inline_timeout_seconds -> Nullable<Integer>,
        processed -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    control_flags (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::table! {
    execution_stacks (stack_id) {
        stack_id -> Binary,
        request_id -> Nullable<Binary>,
        status -> Text,
        initial_task_id -> Text,
        context -> Text,
        trace -> Nullable<Text>,
        final_output -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at -> Text,
        finished_at -> Nullable<Text>,
    }
}

diesel::table! {
    stack_queue (queue_id) {
        queue_id -> BigInt,
        stack_id -> Binary,
        task_id -> Text,
        depth -> Integer,
        parent_queue_id -> Nullable<BigInt>,
        sequence -> Integer,
        status -> Text,
        worker_id -> Nullable<Text>,
        lease_expires_at -> Nullable<Text>,
        parameters -> Text,
        input_context -> Text,
        output -> Nullable<Text>,
        output_context -> Nullable<Text>,
        pushed_tasks -> Nullable<Text>,
        error_message -> Nullable<Text>,
        enqueued_at -> Text,
        started_at -> Nullable<Text>,
        finished_at -> Nullable<Text>,
    }
}

diesel::table! {
    task_requests (request_id) {
        request_id -> Binary,
        task_id -> Text,
        parameters -> Text,
        priority -> Integer,
        requester -> Text,
        status -> Text,
        claimed_by -> Nullable<Text>,
        claimed_at -> Nullable<Text>,
        finished_at -> Nullable<Text>,
        result_ref -> Nullable<Text>,
        error -> Nullable<Text>,
        triggered_by -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    request_dependencies (request_id, depends_on) {
        request_id -> Binary,
        depends_on -> Binary,
    }
}

diesel::table! {
    cascade_rules (rule_id) {
        rule_id -> Text,
        description -> Nullable<Text>,
        source_kind -> Nullable<Text>,
        task_id -> Text,
        parameter_template -> Text,
        priority -> Integer,
        enabled -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    schema_versions (schema_name) {
        schema_name -> Text,
        version -> Text,
        migrated_at -> Text,
        description -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(task_queue, tasks);
diesel::allow_tables_to_appear_in_same_query!(task_fanout, task_queue);
diesel::allow_tables_to_appear_in_same_query!(stack_queue, execution_stacks);
diesel::allow_tables_to_appear_in_same_query!(task_requests, request_dependencies);
diesel::allow_tables_to_appear_in_same_query!(task_requests, cascade_rules);
