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

//! Single-shot queue runner: claim → run → finalize → fan-out.
//!
//! Each invocation claims at most one entry. Before claiming, the control
//! flags are re-read: `kill_all` aborts the worker, `pause_new_tasks`
//! reports an empty queue. Cancellation is checked again after the child
//! exits and overrides the outcome; the child itself is not interrupted.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::artifacts::{self, ActionRecord, FanoutArtifact, OutputRef, RunRecord};
use crate::config::RunnerConfig;
use crate::context::{merge_parameters, Context};
use crate::dal::control::{KILL_ALL, PAUSE_NEW_TASKS};
use crate::dal::DAL;
use crate::database::Database;
use crate::error::RunnerError;
use crate::executor::{self, TaskInvocation};
use crate::models::queue::{FanoutTarget, QueueEntry, QueueStatus};
use crate::models::task::TaskDefinition;
use crate::worker;

/// What one runner invocation did.
#[derive(Debug)]
pub enum RunOutcome {
    /// The kill switch is set; no claim was attempted.
    Killed,
    /// Nothing eligible to claim (or claiming is paused).
    NoTask,
    /// An entry was claimed and driven to a terminal status.
    Completed {
        queue_id: i64,
        status: QueueStatus,
        artifact: Option<PathBuf>,
    },
}

pub struct QueueRunner {
    dal: DAL,
    config: RunnerConfig,
    worker_id: String,
}

impl QueueRunner {
    pub fn new(database: Database, config: RunnerConfig) -> Self {
        QueueRunner {
            dal: DAL::new(database),
            config,
            worker_id: worker::worker_id(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims and runs exactly one queue entry.
    pub async fn run_once(&self) -> Result<RunOutcome, RunnerError> {
        let control = self.dal.control();
        if control.flag(KILL_ALL)? {
            warn!(worker = %self.worker_id, "Kill switch active; refusing to claim");
            return Ok(RunOutcome::Killed);
        }
        if control.flag(PAUSE_NEW_TASKS)? {
            return Ok(RunOutcome::NoTask);
        }

        let Some(entry) = self
            .dal
            .queue()
            .claim_next(&self.worker_id, self.config.lease_seconds)?
        else {
            return Ok(RunOutcome::NoTask);
        };

        info!(
            queue_id = entry.queue_id,
            task_id = %entry.task_id,
            worker = %self.worker_id,
            "Claimed queue entry"
        );

        let Some(definition) = self.dal.tasks().get(&entry.task_id)? else {
            warn!(task_id = %entry.task_id, "Task definition not found");
            return self.finalize_without_run(entry, QueueStatus::Failed);
        };
        if !definition.enabled {
            info!(task_id = %entry.task_id, "Task disabled; cancelling entry");
            return self.finalize_without_run(entry, QueueStatus::Cancelled);
        }

        let merged = merge_parameters(&definition.default_parameters, &entry.parameters);
        let context = Context::new();
        let result = executor::execute(TaskInvocation {
            definition: &definition,
            parameters: merged.clone(),
            context: &context,
            queue_id: Some(entry.queue_id),
            stack_id: None,
            db_path: self.dal.database.db_path(),
        })
        .await;

        // Another actor may have cancelled the row while the child ran; the
        // cancellation wins over the execution outcome.
        let queue = self.dal.queue();
        let mut status = if result.succeeded() {
            QueueStatus::Done
        } else {
            QueueStatus::Failed
        };
        if queue.status_of(entry.queue_id)? == Some(QueueStatus::Cancelled) {
            info!(queue_id = entry.queue_id, "Entry cancelled during execution");
            status = QueueStatus::Cancelled;
        }

        if status == QueueStatus::Done {
            let children = queue.process_fanouts(entry.queue_id)?;
            if !children.is_empty() {
                info!(
                    queue_id = entry.queue_id,
                    children = children.len(),
                    "Enqueued fan-out children"
                );
            }
        }

        queue.finalize(entry.queue_id, status)?;

        let artifact = self.write_artifact(&entry, &definition, &merged, &result, status);
        let artifact = match artifact {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(%err, "Failed to write run artifact");
                None
            }
        };

        info!(
            queue_id = entry.queue_id,
            task_id = %entry.task_id,
            %status,
            exit_code = result.exit_code,
            "Finalized queue entry"
        );

        Ok(RunOutcome::Completed {
            queue_id: entry.queue_id,
            status,
            artifact,
        })
    }

    fn finalize_without_run(
        &self,
        entry: QueueEntry,
        status: QueueStatus,
    ) -> Result<RunOutcome, RunnerError> {
        self.dal.queue().finalize(entry.queue_id, status)?;
        Ok(RunOutcome::Completed {
            queue_id: entry.queue_id,
            status,
            artifact: None,
        })
    }

    fn write_artifact(
        &self,
        entry: &QueueEntry,
        definition: &TaskDefinition,
        merged_parameters: &serde_json::Value,
        result: &executor::ExecutionResult,
        status: QueueStatus,
    ) -> Result<PathBuf, RunnerError> {
        let refreshed = self.dal.queue().get(entry.queue_id)?.unwrap_or_else(|| {
            let mut fallback = entry.clone();
            fallback.status = status;
            fallback
        });
        let fanout = self
            .dal
            .queue()
            .fanouts_for(entry.queue_id)?
            .into_iter()
            .map(|record| FanoutArtifact {
                fanout_id: record.fanout_id,
                child_task_id: match record.target {
                    FanoutTarget::Existing { task_id } => Some(task_id),
                    FanoutTarget::Inline { .. } => None,
                },
                parameters: record.parameters,
                processed: record.processed,
            })
            .collect();

        let record = RunRecord {
            request_id: entry.request_id,
            queue_id: entry.queue_id,
            status: status.to_string(),
            task: definition.clone(),
            queue_entry: refreshed,
            merged_parameters: merged_parameters.clone(),
            worker_id: self.worker_id.clone(),
            started_at: Some(result.started_at),
            finished_at: Some(result.finished_at),
            actions: vec![ActionRecord {
                kind: definition.kind.to_string(),
                started_at: result.started_at,
                finished_at: result.finished_at,
                exit_code: result.exit_code,
                timed_out: result.timed_out,
                cost: result.cost,
                stdout: OutputRef::inline(result.stdout.clone()),
                stderr: OutputRef::inline(result.stderr.clone()),
            }],
            fanout,
        };

        Ok(artifacts::write_run_record(&self.config.runs_dir, &record)?)
    }
}
