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

//! `strata bootstrap` - initialize the store, optionally seed demo tasks
//! and enqueue.

use anyhow::{Context as _, Result};
use clap::Args;
use serde_json::json;
use strata::{Database, Interpreter, NewTaskDefinition, RunnerConfig, DAL};

use crate::EXIT_OK;

#[derive(Args)]
pub struct BootstrapArgs {
    /// Seed the catalog with demo tasks
    #[arg(long)]
    pub seed: bool,

    /// Drop and recreate all tables (WARNING: destroys data)
    #[arg(long)]
    pub reset: bool,

    /// Queue a specific task for execution
    #[arg(long, value_name = "TASK_ID")]
    pub queue: Option<String>,

    /// JSON parameters for the queued task
    #[arg(long, default_value = "{}")]
    pub queue_params: String,
}

pub fn run(args: BootstrapArgs, config: RunnerConfig) -> Result<i32> {
    println!("Using database: {}", config.db_path);

    if args.reset {
        println!("Resetting database...");
        Database::reset(&config.db_path)?;
    }

    std::fs::create_dir_all(&config.runs_dir)
        .with_context(|| format!("failed to create runs dir {}", config.runs_dir.display()))?;

    // Opening the store runs the idempotent migrations.
    let database = Database::new(&config.db_path)?;
    let dal = DAL::new(database);
    println!("Schema initialized");

    if args.seed {
        let seeded = seed_demo_tasks(&dal)?;
        println!("Seeded {seeded} demo tasks");
    }

    if let Some(task_id) = &args.queue {
        let parameters = super::parse_json_object(&args.queue_params)?;
        let outcome = dal.queue().enqueue(task_id, &parameters, None)?;
        if outcome.is_duplicate {
            println!(
                "Task '{task_id}' already queued (request_id={}, queue_id={}, status={})",
                outcome.request_id, outcome.queue_id, outcome.status
            );
        } else {
            println!(
                "Queued task '{task_id}' with queue_id={}, request_id={}",
                outcome.queue_id, outcome.request_id
            );
        }
    }

    let task_count = dal.tasks().list()?.len();
    let queued = dal.queue().queued_count()?;
    println!("\nDatabase summary:");
    println!("  Total tasks defined: {task_count}");
    println!("  Tasks in queue: {queued}");

    Ok(EXIT_OK)
}

fn seed_demo_tasks(dal: &DAL) -> Result<usize> {
    let demos = vec![
        NewTaskDefinition::shell("hello_cli", "echo 'Hello from the shell! Param: {greeting}'")
            .with_default_parameters(json!({"greeting": "World"}))
            .with_timeout(60),
        NewTaskDefinition::inline(
            "hello_python",
            Interpreter::Python,
            r#"
import os
import json
params = json.loads(os.environ.get('TASK_PARAMS', '{}'))
print(f"Hello from Python! Param: {params.get('name', 'Anonymous')}")
"#
            .trim(),
        )
        .with_default_parameters(json!({"name": "PythonUser"}))
        .with_timeout(60),
        NewTaskDefinition::inline(
            "stack_planner",
            Interpreter::Python,
            r#"
import os
import json

params = json.loads(os.environ.get('TASK_PARAMS', '{}'))

problem = params.get('problem', 'solve something')
steps = params.get('steps', ['analyze', 'implement', 'verify'])

push_tasks = []
for i, step in enumerate(steps):
    push_tasks.append({
        "task_id": f"stack_step_{step}",
        "parameters": {"step_name": step, "step_index": i, "problem": problem},
        "reason": f"Step {i+1}: {step}"
    })

result = {
    "__task_result__": True,
    "output": f"Decomposed '{problem}' into {len(steps)} steps",
    "variables": {"problem": problem, "total_steps": len(steps)},
    "decisions": [f"Will execute steps: {steps}"],
    "push_tasks": push_tasks
}

print(json.dumps(result))
"#
            .trim(),
        )
        .with_default_parameters(json!({
            "problem": "build a feature",
            "steps": ["analyze", "implement", "verify"]
        }))
        .with_timeout(60),
        NewTaskDefinition::inline(
            "stack_step_analyze",
            Interpreter::Python,
            r#"
import os
import json

params = json.loads(os.environ.get('TASK_PARAMS', '{}'))
problem = params.get('problem', 'unknown')

findings = [f"Found 3 components for: {problem}", "Dependencies identified"]

result = {
    "__task_result__": True,
    "output": {"phase": "analysis", "findings": findings},
    "variables": {"analysis_complete": True, "component_count": 3},
    "decisions": ["Proceeding with implementation based on analysis"]
}

print(json.dumps(result))
"#
            .trim(),
        )
        .with_timeout(60),
        NewTaskDefinition::inline(
            "stack_step_implement",
            Interpreter::Python,
            r#"
import os
import json

context = json.loads(os.environ.get('TASK_CONTEXT', '{}'))
variables = context.get('variables', {})

if not variables.get('analysis_complete', False):
    result = {
        "__task_result__": True,
        "output": {"error": "Cannot implement without analysis"},
        "errors": ["Analysis not complete"],
        "abort": True
    }
else:
    count = variables.get('component_count', 0)
    result = {
        "__task_result__": True,
        "output": {"phase": "implementation", "components_built": count},
        "variables": {"implementation_complete": True},
        "decisions": [f"Built {count} components based on analysis"]
    }

print(json.dumps(result))
"#
            .trim(),
        )
        .with_timeout(60),
        NewTaskDefinition::inline(
            "stack_step_verify",
            Interpreter::Python,
            r#"
import os
import json

context = json.loads(os.environ.get('TASK_CONTEXT', '{}'))
variables = context.get('variables', {})
outputs = context.get('outputs', [])

impl_done = variables.get('implementation_complete', False)
summary = {"total_phases": len(outputs), "all_variables": variables}

result = {
    "__task_result__": True,
    "output": {"phase": "verification", "summary": summary,
               "status": "PASSED" if impl_done else "FAILED"},
    "variables": {"verification_complete": True},
    "decisions": ["All phases completed successfully" if impl_done else "Verification failed"]
}

print(json.dumps(result))
"#
            .trim(),
        )
        .with_timeout(60),
        NewTaskDefinition::inline(
            "stack_recursive",
            Interpreter::Python,
            r#"
import os
import json

params = json.loads(os.environ.get('TASK_PARAMS', '{}'))
context = json.loads(os.environ.get('TASK_CONTEXT', '{}'))

n = params.get('n', 3)
current_sum = context.get('variables', {}).get('running_sum', 0)
new_sum = current_sum + n

result = {
    "__task_result__": True,
    "output": {"n": n, "running_sum": new_sum},
    "variables": {"running_sum": new_sum},
    "decisions": [f"Added {n} to sum, now {new_sum}"],
    "push_tasks": []
}

if n > 1:
    result["push_tasks"].append({
        "task_id": "stack_recursive",
        "parameters": {"n": n - 1},
        "reason": f"Continue countdown from {n-1}"
    })
else:
    result["variables"]["final_sum"] = new_sum

print(json.dumps(result))
"#
            .trim(),
        )
        .with_default_parameters(json!({"n": 5}))
        .with_timeout(60),
        NewTaskDefinition::inline(
            "fanout_example",
            Interpreter::Python,
            r#"
import os
import json
import sqlite3
from datetime import datetime, timezone

params = json.loads(os.environ.get('TASK_PARAMS', '{}'))
db_path = os.environ.get('TASK_DB', './tasks.db')
queue_id = int(os.environ.get('TASK_QUEUE_ID') or 0)

if queue_id == 0:
    print("No queue_id provided, skipping fan-out")
else:
    conn = sqlite3.connect(db_path)
    count = int(params.get('child_count', 3))
    now = datetime.now(timezone.utc).isoformat(timespec='milliseconds').replace('+00:00', 'Z')
    for i in range(count):
        conn.execute(
            "INSERT INTO task_fanout (parent_queue_id, child_task_id, child_parameters, created_at)"
            " VALUES (?, 'hello_cli', ?, ?)",
            (queue_id, json.dumps({"greeting": f"Child-{i}"}), now))
    conn.commit()
    conn.close()
    print(f"Created {count} fan-out tasks")
"#
            .trim(),
        )
        .with_default_parameters(json!({"child_count": 3}))
        .with_timeout(60),
    ];

    let count = demos.len();
    for demo in &demos {
        dal.tasks().upsert(demo)?;
    }
    Ok(count)
}
