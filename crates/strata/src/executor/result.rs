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

//! Recovers a structured [`TaskResult`] from a task's stdout.
//!
//! Tasks may print arbitrary progress; only the *last* line that is a JSON
//! object carrying `"__task_result__": true` counts as the structured
//! record. Everything else falls back to a bare result wrapping the trimmed
//! stdout, so a malformed record is never fatal on its own.

use serde_json::Value;

use crate::context::TaskResult;

/// Sentinel key marking a structured result line.
pub const RESULT_SENTINEL: &str = "__task_result__";

/// Parses stdout into a [`TaskResult`].
///
/// Scans lines in reverse; the first line (from the end) that both starts
/// with `{`, ends with `}`, and decodes to an object with the sentinel key
/// set to `true` wins. Absent that, the result is a bare wrapper whose
/// output is the trimmed stdout, or JSON null when stdout is blank.
pub fn parse_task_result(stdout: &str) -> TaskResult {
    for line in stdout.lines().rev() {
        let trimmed = line.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        if value.get(RESULT_SENTINEL) != Some(&Value::Bool(true)) {
            continue;
        }
        if let Ok(result) = serde_json::from_value::<TaskResult>(value) {
            return result;
        }
    }

    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        TaskResult::bare(Value::Null)
    } else {
        TaskResult::bare(Value::String(trimmed.to_string()))
    }
}
