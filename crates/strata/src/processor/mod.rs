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

//! Request processor daemon.
//!
//! Polls the request store, claims the next dispatchable request, and runs
//! it as a fresh stack via the stack runner, mirroring the outcome back to
//! the request. SIGINT/SIGTERM set a shutdown flag: any in-flight request
//! finishes, no new one is started, then the loop exits with its counts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::artifacts;
use crate::config::RunnerConfig;
use crate::dal::DAL;
use crate::database::Database;
use crate::error::RunnerError;
use crate::models::request::TaskRequest;
use crate::models::stack::{ExecutionStack, StackStatus};
use crate::runner::StackRunner;
use crate::worker;

/// Default seconds between polls when the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Final counts reported when the loop exits.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProcessorSummary {
    pub processed: u64,
    pub failed: u64,
}

/// Point-in-time statistics: this worker's counters plus request counts per
/// status.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub worker_id: String,
    pub processed: u64,
    pub failed: u64,
    pub queue: std::collections::BTreeMap<String, i64>,
}

pub struct RequestProcessor {
    dal: DAL,
    stack_runner: StackRunner,
    poll_interval: Duration,
    worker_id: String,
    processed: u64,
    failed: u64,
}

impl RequestProcessor {
    pub fn new(database: Database, config: RunnerConfig, poll_interval: Duration) -> Self {
        RequestProcessor {
            dal: DAL::new(database.clone()),
            stack_runner: StackRunner::new(database, config),
            poll_interval,
            worker_id: worker::worker_id(),
            processed: 0,
            failed: 0,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims and executes a single request. Returns false when nothing was
    /// dispatchable.
    pub async fn process_one(&mut self) -> Result<bool, RunnerError> {
        let Some(request) = self.dal.requests().claim_next(&self.worker_id)? else {
            return Ok(false);
        };

        let request_id = request.request_id;
        info!(
            request_id = %request_id,
            task_id = %request.task_id,
            priority = request.priority,
            "Processing request"
        );

        self.dal.requests().mark_executing(request_id)?;

        match self.execute_request(&request).await {
            Ok(stack) if stack.status == StackStatus::Done => {
                // The result ref matches the emitted artifact's filename stem.
                let result_ref = format!("stack_{}", artifacts::id_prefix(&stack.stack_id));
                self.dal.requests().mark_done(request_id, &result_ref)?;
                self.processed += 1;
                info!(request_id = %request_id, %result_ref, "Request completed");
            }
            Ok(stack) => {
                let message = stack
                    .error
                    .unwrap_or_else(|| format!("Stack ended with status: {}", stack.status));
                self.dal.requests().mark_failed(request_id, &message)?;
                self.failed += 1;
                warn!(request_id = %request_id, %message, "Request failed");
            }
            Err(err) => {
                self.dal.requests().mark_failed(request_id, &err.to_string())?;
                self.failed += 1;
                error!(request_id = %request_id, %err, "Request execution errored");
            }
        }

        self.dal.requests().resolve_blocked_for(request_id)?;
        Ok(true)
    }

    async fn execute_request(
        &self,
        request: &TaskRequest,
    ) -> Result<ExecutionStack, RunnerError> {
        // The request id doubles as the stack idempotency key, so a crashed
        // worker's retry resumes the same stack instead of forking a new one.
        let created = self.stack_runner.create_stack(
            &request.task_id,
            &request.parameters,
            Some(request.request_id),
        )?;
        self.stack_runner.run_to_completion(created.stack_id).await
    }

    /// The main polling loop; exits on SIGINT/SIGTERM with final counts.
    pub async fn run_loop(&mut self) -> Result<ProcessorSummary, RunnerError> {
        info!(worker = %self.worker_id, poll_secs = self.poll_interval.as_secs_f64(), "Request processor starting");

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            info!("Shutdown requested");
            flag.store(true, Ordering::SeqCst);
        });

        while !shutdown.load(Ordering::SeqCst) {
            match self.process_one().await {
                Ok(true) => {}
                Ok(false) => {
                    // Defensive sweep: catch dependents whose completions
                    // this worker never observed.
                    if let Err(err) = self.dal.requests().resolve_all_blocked() {
                        warn!(%err, "Failed to resolve blocked requests");
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(err) => {
                    error!(%err, "Error in processing loop");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        let summary = ProcessorSummary {
            processed: self.processed,
            failed: self.failed,
        };
        info!(
            processed = summary.processed,
            failed = summary.failed,
            "Processor stopped"
        );
        Ok(summary)
    }

    /// Current statistics for `--stats`.
    pub fn stats(&self) -> Result<ProcessorStats, RunnerError> {
        let queue = self
            .dal
            .requests()
            .stats()?
            .into_iter()
            .collect::<std::collections::BTreeMap<_, _>>();
        Ok(ProcessorStats {
            worker_id: self.worker_id.clone(),
            processed: self.processed,
            failed: self.failed,
            queue,
        })
    }
}
