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

//! `strata stack` - create and drive execution stacks.

use anyhow::Result;
use clap::Subcommand;
use strata::{Database, ExecutionStack, RunnerConfig, StackRunner, StackStatus, StepOutcome};
use uuid::Uuid;

use crate::{EXIT_ERROR, EXIT_NOTHING_TO_DO, EXIT_OK};

#[derive(Subcommand)]
pub enum StackCommands {
    /// Create a stack and drive it to completion
    Start {
        /// Task to run at the root of the stack
        task_id: String,
        /// JSON object of parameters
        #[arg(long, default_value = "{}")]
        params: String,
        /// Idempotency key; re-using an id resumes the existing stack
        #[arg(long)]
        request_id: Option<Uuid>,
    },
    /// Continue an existing running stack to completion
    Resume { stack_id: Uuid },
    /// Advance a stack by exactly one step
    RunOne { stack_id: Uuid },
    /// Print the stored stack record
    Status { stack_id: Uuid },
}

pub async fn run(command: StackCommands, config: RunnerConfig) -> Result<i32> {
    let database = Database::new(&config.db_path)?;
    let runner = StackRunner::new(database, config);

    match command {
        StackCommands::Start {
            task_id,
            params,
            request_id,
        } => {
            let parameters = super::parse_json_object(&params)?;
            let created = runner.create_stack(&task_id, &parameters, request_id)?;
            if created.is_duplicate {
                println!("Stack already exists for request: {}", created.stack_id);
            }
            let stack = runner.run_to_completion(created.stack_id).await?;
            print_stack(&stack)?;
            Ok(exit_for(&stack))
        }
        StackCommands::Resume { stack_id } => {
            let stack = runner.run_to_completion(stack_id).await?;
            print_stack(&stack)?;
            Ok(exit_for(&stack))
        }
        StackCommands::RunOne { stack_id } => match runner.run_step(stack_id).await? {
            StepOutcome::Stepped {
                queue_id,
                task_id,
                status,
            } => {
                println!("Step {queue_id} ({task_id}): {status}");
                Ok(EXIT_OK)
            }
            StepOutcome::Finished(stack) => {
                print_stack(&stack)?;
                Ok(EXIT_OK)
            }
            StepOutcome::Aborted(stack) => {
                print_stack(&stack)?;
                Ok(EXIT_ERROR)
            }
            StepOutcome::AlreadyFinished(stack) => {
                println!("Stack already {}", stack.status);
                Ok(EXIT_NOTHING_TO_DO)
            }
            StepOutcome::Busy => {
                println!("Stack is held by another worker");
                Ok(EXIT_NOTHING_TO_DO)
            }
        },
        StackCommands::Status { stack_id } => {
            let stack = runner.status(stack_id)?;
            print_stack(&stack)?;
            Ok(EXIT_OK)
        }
    }
}

fn print_stack(stack: &ExecutionStack) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(stack)?);
    Ok(())
}

fn exit_for(stack: &ExecutionStack) -> i32 {
    if stack.status == StackStatus::Done {
        EXIT_OK
    } else {
        EXIT_ERROR
    }
}
