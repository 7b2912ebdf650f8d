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

//! Strata CLI - command-line interface for the Strata task execution engine.
//!
//! Exit codes: 0 success, 1 nothing to do, 2 error, 3 kill switch active.

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata::RunnerConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

pub const EXIT_OK: i32 = 0;
pub const EXIT_NOTHING_TO_DO: i32 = 1;
pub const EXIT_ERROR: i32 = 2;
pub const EXIT_KILLED: i32 = 3;

/// Strata - durable stack-based task execution and request dispatch
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the task store (can also be set via TASK_DB)
    #[arg(long, env = "TASK_DB", global = true, default_value = "./tasks.db")]
    db: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stack execution: create and drive LIFO execution stacks
    Stack {
        #[command(subcommand)]
        command: commands::stack::StackCommands,
    },
    /// Claim and run exactly one queue entry
    Runner,
    /// Request-dispatcher daemon
    Processor(commands::processor::ProcessorArgs),
    /// Initialize the schema, optionally seeding and enqueueing
    Bootstrap(commands::bootstrap::BootstrapArgs),
    /// Manage cascade rules
    Cascade {
        #[command(subcommand)]
        command: commands::cascade::CascadeCommands,
    },
    /// Submit and inspect task requests
    Request {
        #[command(subcommand)]
        command: commands::request::RequestCommands,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = RunnerConfig::from_env();
    config.db_path = cli.db.clone();

    match cli.command {
        Commands::Stack { command } => commands::stack::run(command, config).await,
        Commands::Runner => commands::runner::run(config).await,
        Commands::Processor(args) => commands::processor::run(args, config).await,
        Commands::Bootstrap(args) => commands::bootstrap::run(args, config),
        Commands::Cascade { command } => commands::cascade::run(command, config),
        Commands::Request { command } => commands::request::run(command, config),
    }
}
