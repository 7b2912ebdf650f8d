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

//! End-to-end scenarios driven through the stack runner: LIFO composition,
//! abort propagation, error accumulation, and artifacts.

use serde_json::json;
use strata::runner::StepOutcome;
use strata::{QueueStatus, StackRunner, StackStatus};

use crate::fixtures::TestHarness;

fn runner(harness: &TestHarness) -> StackRunner {
    StackRunner::new(harness.database.clone(), harness.config.clone())
}

fn seed_planner(harness: &TestHarness) {
    harness.result_task(
        "planner",
        r#"{"__task_result__": true, "output": "planned", "push_tasks": [{"task_id": "a"}, {"task_id": "b"}, {"task_id": "c"}]}"#,
    );
    harness.result_task("a", r#"{"__task_result__": true, "output": "a"}"#);
    harness.result_task("b", r#"{"__task_result__": true, "output": "b"}"#);
    harness.result_task("c", r#"{"__task_result__": true, "output": "c"}"#);
}

#[tokio::test]
async fn test_lifo_composition_runs_children_in_author_order() {
    let harness = TestHarness::new();
    seed_planner(&harness);

    let runner = runner(&harness);
    let created = runner.create_stack("planner", &json!({}), None).unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    assert_eq!(stack.status, StackStatus::Done);
    assert_eq!(
        stack.context.outputs,
        vec![json!("planned"), json!("a"), json!("b"), json!("c")]
    );

    // The trace records the actual execution order.
    let trace = stack.trace.expect("trace persisted");
    let executed: Vec<&str> = trace.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(executed, vec!["planner", "a", "b", "c"]);
    assert!(trace.iter().all(|t| t.status == "done"));
    assert_eq!(trace[0].pushed_tasks.len(), 3);
}

#[tokio::test]
async fn test_abort_fails_stack_and_skips_remaining_children() {
    let harness = TestHarness::new();
    seed_planner(&harness);
    // B aborts instead of succeeding.
    harness.result_task(
        "b",
        r#"{"__task_result__": true, "abort": true, "errors": ["stop"]}"#,
    );

    let runner = runner(&harness);
    let created = runner.create_stack("planner", &json!({}), None).unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    assert_eq!(stack.status, StackStatus::Failed);
    assert_eq!(stack.error.as_deref(), Some("Task requested abort"));
    assert!(stack.context.errors.contains(&"stop".to_string()));

    // A ran and succeeded; B failed; C never ran.
    let dal = harness.dal();
    let entries = dal.stacks().entries(created.stack_id).unwrap();
    let status_of = |task: &str| {
        entries
            .iter()
            .find(|e| e.task_id == task)
            .map(|e| e.status)
            .unwrap()
    };
    assert_eq!(status_of("a"), QueueStatus::Done);
    assert_eq!(status_of("b"), QueueStatus::Failed);
    assert_eq!(status_of("c"), QueueStatus::Queued);
}

#[tokio::test]
async fn test_step_failure_accumulates_errors_without_failing_stack() {
    let harness = TestHarness::new();
    harness.result_task(
        "planner",
        r#"{"__task_result__": true, "output": "planned", "push_tasks": [{"task_id": "broken"}, {"task_id": "after"}]}"#,
    );
    harness.shell_task("broken", "echo bad >&2; exit 2");
    harness.result_task("after", r#"{"__task_result__": true, "output": "after"}"#);

    let runner = runner(&harness);
    let created = runner.create_stack("planner", &json!({}), None).unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    // Only abort fails a stack; a failed step records its error and the
    // remaining children still run.
    assert_eq!(stack.status, StackStatus::Done);
    assert_eq!(stack.context.errors.len(), 1);
    assert!(stack.context.errors[0].contains("exited with code 2"));
    assert!(stack.context.errors[0].contains("bad"));
    assert_eq!(
        stack.context.outputs,
        vec![json!("planned"), json!(null), json!("after")]
    );

    let dal = harness.dal();
    let entries = dal.stacks().entries(created.stack_id).unwrap();
    let broken = entries.iter().find(|e| e.task_id == "broken").unwrap();
    assert_eq!(broken.status, QueueStatus::Failed);
    assert!(broken
        .error_message
        .as_deref()
        .unwrap()
        .contains("exited with code 2"));
}

#[tokio::test]
async fn test_variables_flow_between_steps() {
    let harness = TestHarness::new();
    harness.result_task(
        "setter",
        r#"{"__task_result__": true, "output": "set", "variables": {"flag": true}, "push_tasks": [{"task_id": "reader"}]}"#,
    );
    // The reader sees the variable through TASK_CONTEXT.
    harness.shell_task(
        "reader",
        r#"case "$TASK_CONTEXT" in *'"flag":true'*) echo saw-flag;; *) echo missing; exit 1;; esac"#,
    );

    let runner = runner(&harness);
    let created = runner.create_stack("setter", &json!({}), None).unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    assert_eq!(stack.status, StackStatus::Done);
    assert_eq!(stack.context.variables["flag"], json!(true));
    assert_eq!(stack.context.outputs[1], json!("saw-flag"));
}

#[tokio::test]
async fn test_missing_definition_fails_step_not_stack() {
    let harness = TestHarness::new();
    harness.result_task(
        "planner",
        r#"{"__task_result__": true, "output": "planned", "push_tasks": [{"task_id": "ghost"}]}"#,
    );

    let runner = runner(&harness);
    let created = runner.create_stack("planner", &json!({}), None).unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    assert_eq!(stack.status, StackStatus::Done);
    assert!(stack
        .context
        .errors
        .iter()
        .any(|e| e.contains("task definition not found: ghost")));
}

#[tokio::test]
async fn test_terminal_stack_step_is_a_noop() {
    let harness = TestHarness::new();
    harness.result_task("solo", r#"{"__task_result__": true, "output": "done"}"#);

    let runner = runner(&harness);
    let created = runner.create_stack("solo", &json!({}), None).unwrap();
    runner.run_to_completion(created.stack_id).await.unwrap();

    match runner.run_step(created.stack_id).await.unwrap() {
        StepOutcome::AlreadyFinished(stack) => assert_eq!(stack.status, StackStatus::Done),
        other => panic!("expected AlreadyFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_one_advances_a_single_step() {
    let harness = TestHarness::new();
    seed_planner(&harness);

    let runner = runner(&harness);
    let created = runner.create_stack("planner", &json!({}), None).unwrap();

    match runner.run_step(created.stack_id).await.unwrap() {
        StepOutcome::Stepped {
            task_id, status, ..
        } => {
            assert_eq!(task_id, "planner");
            assert_eq!(status, QueueStatus::Done);
        }
        other => panic!("expected Stepped, got {other:?}"),
    }

    // Children queued, stack still running.
    let stack = runner.status(created.stack_id).unwrap();
    assert_eq!(stack.status, StackStatus::Running);
    assert_eq!(stack.context.outputs.len(), 1);
}

#[tokio::test]
async fn test_stack_artifact_written_with_trace() {
    let harness = TestHarness::new();
    seed_planner(&harness);

    let runner = runner(&harness);
    let created = runner.create_stack("planner", &json!({}), None).unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    let prefix = &stack.stack_id.simple().to_string()[..8];
    let path = harness.config.runs_dir.join(format!("stack_{prefix}.json"));
    assert!(path.is_file(), "stack artifact exists at {}", path.display());

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(record["status"], json!("done"));
    assert_eq!(record["initial_task_id"], json!("planner"));
    assert_eq!(record["trace"].as_array().unwrap().len(), 4);
    assert_eq!(
        record["final_context"]["outputs"].as_array().unwrap().len(),
        4
    );
}

#[tokio::test]
async fn test_parameters_substituted_into_shell_template() {
    let harness = TestHarness::new();
    harness.shell_task(
        "greeter",
        r#"echo "{\"__task_result__\": true, \"output\": \"Hello {name}\"}""#,
    );

    let runner = runner(&harness);
    let created = runner
        .create_stack("greeter", &json!({"name": "Strata"}), None)
        .unwrap();
    let stack = runner.run_to_completion(created.stack_id).await.unwrap();

    assert_eq!(stack.status, StackStatus::Done);
    assert_eq!(stack.context.outputs[0], json!("Hello Strata"));
}
