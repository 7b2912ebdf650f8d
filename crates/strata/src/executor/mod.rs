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

//! Task execution in child processes.
//!
//! One invocation runs one task definition as a subprocess, honoring kind,
//! timeout, working directory, and environment, and captures stdout, stderr,
//! exit status, and resource cost. Execution failures are encoded in the
//! returned [`ExecutionResult`] rather than raised: timeout is exit −1,
//! spawn and definition errors are exit −2, and any other non-zero exit is a
//! normal task failure.

pub mod cost;
pub mod result;

use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{Context, TaskResult};
use crate::models::task::{TaskDefinition, TaskKind};
pub use cost::ExecutionCost;
pub use result::{parse_task_result, RESULT_SENTINEL};

/// Exit code recorded when the task exceeded its timeout.
pub const EXIT_TIMEOUT: i32 = -1;
/// Exit code recorded when the process could not be spawned at all,
/// including definition errors detected before spawn.
pub const EXIT_SPAWN_FAILURE: i32 = -2;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// One task invocation: the definition plus its merged parameters, context
/// snapshot, and store wiring.
#[derive(Debug)]
pub struct TaskInvocation<'a> {
    pub definition: &'a TaskDefinition,
    /// Definition defaults overlaid by per-invocation parameters.
    pub parameters: Value,
    pub context: &'a Context,
    pub queue_id: Option<i64>,
    pub stack_id: Option<Uuid>,
    pub db_path: &'a str,
}

/// Everything captured from one invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub cost: ExecutionCost,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub timed_out: bool,
    /// Structured result parsed from stdout; a bare wrapper when the task
    /// printed none.
    pub parsed_result: TaskResult,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one task invocation to completion (or timeout) and captures its
/// output and cost.
pub async fn execute(invocation: TaskInvocation<'_>) -> ExecutionResult {
    let started_at = Utc::now();
    let tracker = cost::CostTracker::start();
    let definition = invocation.definition;

    // The temp file backing an inline script must outlive the child; it is
    // removed on drop, error paths included.
    let mut inline_script: Option<tempfile::NamedTempFile> = None;

    let mut command = match build_command(&invocation, &mut inline_script) {
        Ok(command) => command,
        Err(message) => {
            warn!(task_id = %definition.task_id, %message, "Task invocation failed before spawn");
            return pre_spawn_failure(started_at, tracker, message);
        }
    };

    apply_environment(&mut command, &invocation);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            let message = format!("failed to spawn task process: {err}");
            warn!(task_id = %definition.task_id, %message, "Spawn error");
            return pre_spawn_failure(started_at, tracker, message);
        }
    };

    // Drain both pipes concurrently so a chatty child never deadlocks on a
    // full pipe buffer.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(drain_pipe(stdout_pipe));
    let stderr_task = tokio::spawn(drain_pipe(stderr_pipe));

    let timeout = std::time::Duration::from_secs(definition.timeout_seconds.max(0) as u64);
    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (exit_code_of(status), false),
        Ok(Err(err)) => {
            warn!(task_id = %definition.task_id, %err, "Failed waiting on task process");
            (EXIT_SPAWN_FAILURE, false)
        }
        Err(_elapsed) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            (EXIT_TIMEOUT, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let mut stderr = stderr_task.await.unwrap_or_default();
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "[timeout after {}s]",
            definition.timeout_seconds
        ));
    }

    let parsed_result = parse_task_result(&stdout);
    let finished_at = Utc::now();
    let execution_cost = tracker.finish();

    debug!(
        task_id = %definition.task_id,
        exit_code,
        timed_out,
        wall_ms = execution_cost.wall_ms,
        "Task execution finished"
    );

    ExecutionResult {
        exit_code,
        stdout,
        stderr,
        cost: execution_cost,
        started_at,
        finished_at,
        timed_out,
        parsed_result,
    }
}

fn build_command(
    invocation: &TaskInvocation<'_>,
    inline_script: &mut Option<tempfile::NamedTempFile>,
) -> Result<Command, String> {
    let definition = invocation.definition;

    let mut command = match definition.kind {
        TaskKind::Shell => {
            let line = substitute_placeholders(&definition.code, &invocation.parameters)?;
            let mut command = Command::new("sh");
            command.arg("-c").arg(line);
            command
        }
        TaskKind::InterpretedInline => {
            use std::io::Write;

            let mut file = tempfile::Builder::new()
                .prefix("strata_task_")
                .suffix(definition.interpreter.extension())
                .tempfile()
                .map_err(|err| format!("failed to write inline script: {err}"))?;
            file.write_all(definition.code.as_bytes())
                .map_err(|err| format!("failed to write inline script: {err}"))?;
            file.flush()
                .map_err(|err| format!("failed to write inline script: {err}"))?;

            let mut command = Command::new(definition.interpreter.command());
            command.arg(file.path());
            *inline_script = Some(file);
            command
        }
        TaskKind::InterpretedFile => {
            let path = resolve_script_path(&definition.code);
            if !path.is_file() {
                return Err(format!("script file not found: {}", path.display()));
            }
            let mut command = Command::new(definition.interpreter.command());
            command.arg(path);
            command
        }
    };

    if let Some(dir) = &definition.working_directory {
        command.current_dir(dir);
    }
    Ok(command)
}

fn apply_environment(command: &mut Command, invocation: &TaskInvocation<'_>) {
    // The parent environment is inherited; per-task overrides apply on top,
    // then the wiring variables always win.
    for (key, value) in &invocation.definition.environment_overrides {
        command.env(key, value);
    }
    command
        .env("TASK_PARAMS", invocation.parameters.to_string())
        .env("TASK_CONTEXT", invocation.context.to_json_string())
        .env(
            "TASK_QUEUE_ID",
            invocation
                .queue_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
        )
        .env(
            "TASK_STACK_ID",
            invocation
                .stack_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
        )
        .env("TASK_DB", invocation.db_path);
}

/// Substitutes `{name}` placeholders from merged parameters. A placeholder
/// with no matching parameter fails the execution.
fn substitute_placeholders(template: &str, parameters: &Value) -> Result<String, String> {
    let mut missing: Option<String> = None;
    let substituted = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        match parameters.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(format!("missing parameter for placeholder {{{name}}}")),
        None => Ok(substituted.into_owned()),
    }
}

/// Script paths resolve relative to the runner binary's directory when not
/// absolute.
fn resolve_script_path(code: &str) -> PathBuf {
    let path = PathBuf::from(code);
    if path.is_absolute() {
        return path;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&path)))
        .unwrap_or(path)
}

async fn drain_pipe<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer).await;
    String::from_utf8_lossy(&buffer).into_owned()
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(EXIT_SPAWN_FAILURE)
}

fn pre_spawn_failure(
    started_at: DateTime<Utc>,
    tracker: cost::CostTracker,
    message: String,
) -> ExecutionResult {
    ExecutionResult {
        exit_code: EXIT_SPAWN_FAILURE,
        stdout: String::new(),
        stderr: message,
        cost: tracker.finish(),
        started_at,
        finished_at: Utc::now(),
        timed_out: false,
        parsed_result: TaskResult::bare(Value::Null),
    }
}
