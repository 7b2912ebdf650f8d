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

//! `strata runner` - claim and run exactly one queue entry.

use anyhow::Result;
use strata::runner::RunOutcome;
use strata::{Database, QueueRunner, RunnerConfig};

use crate::{EXIT_KILLED, EXIT_NOTHING_TO_DO, EXIT_OK};

pub async fn run(config: RunnerConfig) -> Result<i32> {
    let database = Database::new(&config.db_path)?;
    let runner = QueueRunner::new(database, config);

    match runner.run_once().await? {
        RunOutcome::Killed => {
            println!("killed");
            Ok(EXIT_KILLED)
        }
        RunOutcome::NoTask => {
            println!("No task available");
            Ok(EXIT_NOTHING_TO_DO)
        }
        RunOutcome::Completed {
            queue_id,
            status,
            artifact,
        } => {
            println!("Queue entry {queue_id} finished: {status}");
            if let Some(path) = artifact {
                println!("Artifact: {}", path.display());
            }
            Ok(EXIT_OK)
        }
    }
}
