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

//! `strata cascade` - manage cascade rules.

use anyhow::Result;
use clap::Subcommand;
use strata::{Database, NewCascadeRule, RunnerConfig, DAL};

use crate::{EXIT_NOTHING_TO_DO, EXIT_OK};

#[derive(Subcommand)]
pub enum CascadeCommands {
    /// List all cascade rules
    List {
        /// Only show enabled rules
        #[arg(long, short = 'e')]
        enabled_only: bool,
    },
    /// Get a specific rule
    Get { rule_id: String },
    /// Create or update a rule
    Create {
        /// Unique rule identifier
        #[arg(long)]
        rule_id: String,
        /// Task to create requests for
        #[arg(long)]
        task: String,
        /// Rule description
        #[arg(long)]
        description: Option<String>,
        /// Match sources with this kind (omit to match all)
        #[arg(long)]
        source_kind: Option<String>,
        /// JSON parameter template with $source.<field> placeholders
        #[arg(long)]
        parameters: Option<String>,
        /// Priority for created requests
        #[arg(long, default_value_t = 50)]
        priority: i32,
        /// Create as disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Enable a rule
    Enable { rule_id: String },
    /// Disable a rule
    Disable { rule_id: String },
    /// Delete a rule
    Delete { rule_id: String },
    /// Show requests triggered by a rule
    Triggered {
        rule_id: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

pub fn run(command: CascadeCommands, config: RunnerConfig) -> Result<i32> {
    let database = Database::new(&config.db_path)?;
    let dal = DAL::new(database);
    let cascade = dal.cascade();

    match command {
        CascadeCommands::List { enabled_only } => {
            let rules = cascade.list(enabled_only)?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
            Ok(EXIT_OK)
        }
        CascadeCommands::Get { rule_id } => match cascade.get(&rule_id)? {
            Some(rule) => {
                println!("{}", serde_json::to_string_pretty(&rule)?);
                Ok(EXIT_OK)
            }
            None => {
                println!("Rule '{rule_id}' not found");
                Ok(EXIT_NOTHING_TO_DO)
            }
        },
        CascadeCommands::Create {
            rule_id,
            task,
            description,
            source_kind,
            parameters,
            priority,
            disabled,
        } => {
            let mut rule = NewCascadeRule::new(rule_id, task);
            if description.is_some() {
                rule.description = description;
            }
            rule.source_kind = source_kind;
            if let Some(template) = parameters {
                rule.parameter_template = template;
            }
            rule.priority = priority;
            rule.enabled = !disabled;

            let created = cascade.upsert(&rule)?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(EXIT_OK)
        }
        CascadeCommands::Enable { rule_id } => toggle(&dal, &rule_id, true),
        CascadeCommands::Disable { rule_id } => toggle(&dal, &rule_id, false),
        CascadeCommands::Delete { rule_id } => {
            if cascade.delete(&rule_id)? {
                println!("Rule '{rule_id}' deleted");
                Ok(EXIT_OK)
            } else {
                println!("Rule '{rule_id}' not found");
                Ok(EXIT_NOTHING_TO_DO)
            }
        }
        CascadeCommands::Triggered { rule_id, limit } => {
            let requests = dal.requests().triggered_by(&rule_id, limit)?;
            println!("{}", serde_json::to_string_pretty(&requests)?);
            Ok(EXIT_OK)
        }
    }
}

fn toggle(dal: &DAL, rule_id: &str, enabled: bool) -> Result<i32> {
    if dal.cascade().set_enabled(rule_id, enabled)? {
        println!(
            "Rule '{rule_id}' {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(EXIT_OK)
    } else {
        println!("Rule '{rule_id}' not found");
        Ok(EXIT_NOTHING_TO_DO)
    }
}
