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

//! `strata request` - submit and inspect task requests.

use anyhow::Result;
use clap::Subcommand;
use strata::{Database, NewTaskRequest, RequestStatus, RunnerConfig, DAL};
use uuid::Uuid;

use crate::{EXIT_NOTHING_TO_DO, EXIT_OK};

#[derive(Subcommand)]
pub enum RequestCommands {
    /// Submit a new task request
    Submit {
        /// Task to request
        #[arg(long)]
        task: String,
        /// JSON object of parameters
        #[arg(long, default_value = "{}")]
        params: String,
        /// Priority 1-1000 (higher dispatches first)
        #[arg(long, default_value_t = 100)]
        priority: i32,
        /// Who is asking
        #[arg(long, default_value = "cli")]
        requester: String,
        /// Requests that must complete first (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<Uuid>,
        /// Explicit request id for idempotent submission
        #[arg(long)]
        request_id: Option<Uuid>,
    },
    /// Cancel a pending or blocked request
    Cancel { request_id: Uuid },
    /// Show one request
    Show { request_id: Uuid },
    /// List requests, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<RequestStatus>,
    },
}

pub fn run(command: RequestCommands, config: RunnerConfig) -> Result<i32> {
    let database = Database::new(&config.db_path)?;
    let dal = DAL::new(database);
    let requests = dal.requests();

    match command {
        RequestCommands::Submit {
            task,
            params,
            priority,
            requester,
            depends_on,
            request_id,
        } => {
            let parameters = super::parse_json_object(&params)?;
            let mut request = NewTaskRequest::new(task, parameters)
                .with_priority(priority)
                .with_requester(requester)
                .depends_on(depends_on);
            request.request_id = request_id;

            let submitted = requests.submit(&request)?;
            println!("{}", serde_json::to_string_pretty(&submitted)?);
            Ok(EXIT_OK)
        }
        RequestCommands::Cancel { request_id } => {
            let cancelled = requests.cancel(request_id)?;
            println!("{}", serde_json::to_string_pretty(&cancelled)?);
            Ok(EXIT_OK)
        }
        RequestCommands::Show { request_id } => match requests.get(request_id)? {
            Some(request) => {
                println!("{}", serde_json::to_string_pretty(&request)?);
                Ok(EXIT_OK)
            }
            None => {
                println!("Request '{request_id}' not found");
                Ok(EXIT_NOTHING_TO_DO)
            }
        },
        RequestCommands::List { status } => {
            let listed = requests.list(status)?;
            println!("{}", serde_json::to_string_pretty(&listed)?);
            Ok(EXIT_OK)
        }
    }
}
