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

//! LIFO stack runner.
//!
//! Drives a stack one claimed step at a time: claim (highest eligible
//! `queue_id`), execute, bind the task result into the context, push
//! children, persist. The parent is finalized before any child runs; what
//! looks like yielding in task code is really the structured result naming
//! the next tasks.
//!
//! A child's errors flow into the context but do not fail the stack; only
//! `abort: true` does. A task that aborts after pushing children leaves
//! them `queued` in the failed stack.

use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts;
use crate::config::RunnerConfig;
use crate::context::{merge_parameters, TaskResult};
use crate::dal::stacks::StepFinalization;
use crate::dal::DAL;
use crate::database::Database;
use crate::error::RunnerError;
use crate::executor::{self, TaskInvocation};
use crate::models::queue::QueueStatus;
use crate::models::stack::{CreatedStack, ExecutionStack, StackQueueEntry, StackStatus};
use crate::worker;

/// Error recorded on the stack when a task requests abort.
pub const ABORT_ERROR: &str = "Task requested abort";

/// What one step invocation did.
#[derive(Debug)]
pub enum StepOutcome {
    /// One step executed; the stack remains running.
    Stepped {
        queue_id: i64,
        task_id: String,
        status: QueueStatus,
    },
    /// No eligible rows remained; the stack was finalized as done.
    Finished(ExecutionStack),
    /// The executed task set `abort`; the stack was finalized as failed.
    Aborted(ExecutionStack),
    /// The stack was already terminal; nothing was done.
    AlreadyFinished(ExecutionStack),
    /// Rows exist but are leased by another live worker.
    Busy,
}

pub struct StackRunner {
    dal: DAL,
    config: RunnerConfig,
    worker_id: String,
}

impl StackRunner {
    pub fn new(database: Database, config: RunnerConfig) -> Self {
        StackRunner {
            dal: DAL::new(database),
            config,
            worker_id: worker::worker_id(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Creates a stack with its root entry queued.
    pub fn create_stack(
        &self,
        task_id: &str,
        parameters: &serde_json::Value,
        request_id: Option<Uuid>,
    ) -> Result<CreatedStack, RunnerError> {
        Ok(self.dal.stacks().create(task_id, parameters, request_id)?)
    }

    /// Fetches the stored stack record.
    pub fn status(&self, stack_id: Uuid) -> Result<ExecutionStack, RunnerError> {
        self.dal
            .stacks()
            .get(stack_id)?
            .ok_or(RunnerError::StackNotFound(stack_id))
    }

    /// Advances a stack by exactly one step.
    pub async fn run_step(&self, stack_id: Uuid) -> Result<StepOutcome, RunnerError> {
        let stack = self.status(stack_id)?;
        if stack.status.is_terminal() {
            info!(stack_id = %stack_id, status = %stack.status, "Stack already terminal");
            return Ok(StepOutcome::AlreadyFinished(stack));
        }

        let stacks = self.dal.stacks();
        let Some(entry) = stacks.claim_next(stack_id, &self.worker_id, self.config.lease_seconds)?
        else {
            if stacks.open_entry_count(stack_id)? > 0 {
                return Ok(StepOutcome::Busy);
            }
            let stack = stacks.finalize_stack(stack_id, StackStatus::Done, None)?;
            self.write_artifact(&stack);
            info!(stack_id = %stack_id, "Stack completed");
            return Ok(StepOutcome::Finished(stack));
        };

        info!(
            stack_id = %stack_id,
            queue_id = entry.queue_id,
            task_id = %entry.task_id,
            depth = entry.depth,
            "Executing stack step"
        );

        let step = self.execute_step(stack_id, &entry).await?;
        let aborted = step.task_result.abort;
        let step_status = step.status;

        let output_context = entry.input_context.bind(&step.task_result);
        let pushed = if step.exit_code == 0 {
            step.task_result.push_tasks.clone()
        } else {
            Vec::new()
        };

        stacks.finalize_step(StepFinalization {
            queue_id: entry.queue_id,
            stack_id,
            status: step_status,
            output: step.task_result.output.clone(),
            output_context: &output_context,
            pushed_tasks: &pushed,
            error_message: step.error_message.clone(),
        })?;

        if aborted {
            let stack =
                stacks.finalize_stack(stack_id, StackStatus::Failed, Some(ABORT_ERROR.into()))?;
            self.write_artifact(&stack);
            warn!(stack_id = %stack_id, queue_id = entry.queue_id, "Stack aborted by task");
            return Ok(StepOutcome::Aborted(stack));
        }

        Ok(StepOutcome::Stepped {
            queue_id: entry.queue_id,
            task_id: entry.task_id,
            status: step_status,
        })
    }

    /// Drives a stack until it finishes, aborts, or is held by another
    /// worker's live lease.
    pub async fn run_to_completion(&self, stack_id: Uuid) -> Result<ExecutionStack, RunnerError> {
        loop {
            match self.run_step(stack_id).await? {
                StepOutcome::Stepped { .. } => continue,
                StepOutcome::Finished(stack)
                | StepOutcome::Aborted(stack)
                | StepOutcome::AlreadyFinished(stack) => return Ok(stack),
                StepOutcome::Busy => return self.status(stack_id),
            }
        }
    }

    async fn execute_step(
        &self,
        stack_id: Uuid,
        entry: &StackQueueEntry,
    ) -> Result<ExecutedStep, RunnerError> {
        let definition = self.dal.tasks().get(&entry.task_id)?;

        let definition = match definition {
            None => {
                let message = format!("task definition not found: {}", entry.task_id);
                warn!(stack_id = %stack_id, task_id = %entry.task_id, "{message}");
                return Ok(ExecutedStep::definition_failure(message));
            }
            Some(def) if !def.enabled => {
                let message = format!("task disabled: {}", entry.task_id);
                warn!(stack_id = %stack_id, task_id = %entry.task_id, "{message}");
                return Ok(ExecutedStep::definition_failure(message));
            }
            Some(def) => def,
        };

        let merged = merge_parameters(&definition.default_parameters, &entry.parameters);
        let result = executor::execute(TaskInvocation {
            definition: &definition,
            parameters: merged,
            context: &entry.input_context,
            queue_id: Some(entry.queue_id),
            stack_id: Some(stack_id),
            db_path: self.dal.database.db_path(),
        })
        .await;

        let mut task_result = result.parsed_result.clone();
        let mut error_message = None;

        if result.exit_code != 0 {
            let message = format!(
                "task exited with code {}: {}",
                result.exit_code,
                result.stderr.trim()
            );
            task_result.errors.push(message.clone());
            error_message = Some(message);
        } else if task_result.abort {
            error_message = Some(ABORT_ERROR.to_string());
        }

        let status = if result.exit_code == 0 && !task_result.abort {
            QueueStatus::Done
        } else {
            QueueStatus::Failed
        };

        Ok(ExecutedStep {
            exit_code: result.exit_code,
            status,
            task_result,
            error_message,
        })
    }

    fn write_artifact(&self, stack: &ExecutionStack) {
        if let Err(err) = artifacts::write_stack_record(&self.config.runs_dir, stack) {
            warn!(stack_id = %stack.stack_id, %err, "Failed to write stack artifact");
        }
    }
}

struct ExecutedStep {
    exit_code: i32,
    status: QueueStatus,
    task_result: TaskResult,
    error_message: Option<String>,
}

impl ExecutedStep {
    /// A step that failed before any process was spawned.
    fn definition_failure(message: String) -> Self {
        let mut task_result = TaskResult::default();
        task_result.errors.push(message.clone());
        ExecutedStep {
            exit_code: executor::EXIT_SPAWN_FAILURE,
            status: QueueStatus::Failed,
            task_result,
            error_message: Some(message),
        }
    }
}
