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

//! # Strata
//!
//! A durable task execution core: a leased single-shot queue, a LIFO stack
//! runner threading an accumulating context through dynamically pushed
//! sub-tasks, and a request dispatcher bridging agent-submitted requests to
//! stack executions.
//!
//! ## Subsystems
//!
//! - [`runner::QueueRunner`] — one-shot executor over the durable queue:
//!   claim with lease, run in a subprocess, finalize, fan out children.
//! - [`runner::StackRunner`] — LIFO engine over execution stacks: each step
//!   observes the context as of its own execution and its result is folded
//!   in via [`Context::bind`].
//! - [`processor::RequestProcessor`] — polling daemon that claims
//!   prioritized, dependency-gated task requests and dispatches each as a
//!   fresh stack.
//!
//! Workers coordinate entirely through the SQLite store: claims are
//! conditional updates inside immediate transactions, and `running` rows
//! carry a lease whose expiry makes them stealable by other workers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata::{Database, RunnerConfig, StackRunner};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let database = Database::new("./tasks.db")?;
//! let runner = StackRunner::new(database, RunnerConfig::from_env());
//! let created = runner.create_stack("planner", &serde_json::json!({}), None)?;
//! let stack = runner.run_to_completion(created.stack_id).await?;
//! println!("final context: {:?}", stack.context);
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod config;
pub mod context;
pub mod dal;
pub mod database;
pub mod error;
pub mod executor;
pub mod models;
pub mod processor;
pub mod runner;
pub mod worker;

pub use config::RunnerConfig;
pub use context::{Context, PushTask, TaskResult};
pub use dal::DAL;
pub use database::Database;
pub use error::{RequestError, RunnerError, StoreError};
pub use executor::{ExecutionCost, ExecutionResult};
pub use models::cascade::{CascadeRule, NewCascadeRule, SourceEvent};
pub use models::queue::{EnqueueOutcome, QueueEntry, QueueStatus};
pub use models::request::{NewTaskRequest, RequestStatus, TaskRequest};
pub use models::stack::{ExecutionStack, StackQueueEntry, StackStatus};
pub use models::task::{Interpreter, NewTaskDefinition, TaskDefinition, TaskKind};
pub use processor::RequestProcessor;
pub use runner::{QueueRunner, RunOutcome, StackRunner, StepOutcome};

use tracing_subscriber::EnvFilter;

/// Initializes tracing for binaries and tests. `filter` overrides the
/// `RUST_LOG` environment default.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
