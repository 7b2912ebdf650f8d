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

//! `strata processor` - the request-dispatcher daemon.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use strata::{Database, RequestProcessor, RunnerConfig};

use crate::{EXIT_NOTHING_TO_DO, EXIT_OK};

#[derive(Args)]
pub struct ProcessorArgs {
    /// Seconds between polls when the queue is empty
    #[arg(long, short = 'i', default_value_t = 2.0)]
    pub poll_interval: f64,

    /// Lease duration for claimed stack steps, in seconds
    #[arg(long, short = 'l')]
    pub lease_seconds: Option<i64>,

    /// Process one request and exit
    #[arg(long, short = '1')]
    pub single: bool,

    /// Show queue statistics and exit
    #[arg(long)]
    pub stats: bool,
}

pub async fn run(args: ProcessorArgs, mut config: RunnerConfig) -> Result<i32> {
    if let Some(lease) = args.lease_seconds {
        config.lease_seconds = lease;
    }

    let database = Database::new(&config.db_path)?;
    let mut processor = RequestProcessor::new(
        database,
        config,
        Duration::from_secs_f64(args.poll_interval),
    );

    if args.stats {
        let stats = processor.stats()?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(EXIT_OK);
    }

    if args.single {
        if processor.process_one().await? {
            return Ok(EXIT_OK);
        }
        println!("No requests to process");
        return Ok(EXIT_NOTHING_TO_DO);
    }

    let summary = processor.run_loop().await?;
    println!(
        "Requests processed: {}\nRequests failed: {}",
        summary.processed, summary.failed
    );
    Ok(EXIT_OK)
}
