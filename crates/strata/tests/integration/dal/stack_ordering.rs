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

//! Stack store semantics: LIFO claiming, dynamic context snapshots, trace
//! completeness, and stack-level idempotency.

use serde_json::json;
use strata::context::{Context, PushTask, TaskResult};
use strata::dal::stacks::StepFinalization;
use strata::models::stack::StackStatus;
use strata::QueueStatus;
use uuid::Uuid;

use crate::fixtures::TestHarness;

fn push(task_id: &str) -> PushTask {
    PushTask {
        task_id: task_id.to_string(),
        parameters: json!({}),
        reason: None,
    }
}

fn result_with_output(output: serde_json::Value) -> TaskResult {
    TaskResult {
        output,
        ..Default::default()
    }
}

#[test]
fn test_create_stack_seeds_root_entry() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let created = dal
        .stacks()
        .create("planner", &json!({"goal": "x"}), None)
        .unwrap();
    assert!(!created.is_duplicate);

    let entries = dal.stacks().entries(created.stack_id).unwrap();
    assert_eq!(entries.len(), 1);
    let root = &entries[0];
    assert_eq!(root.depth, 0);
    assert_eq!(root.sequence, 0);
    assert_eq!(root.status, QueueStatus::Queued);
    assert_eq!(root.parameters, json!({"goal": "x"}));
    assert_eq!(root.input_context, Context::new());

    let stack = dal.stacks().get(created.stack_id).unwrap().unwrap();
    assert_eq!(stack.status, StackStatus::Running);
    assert_eq!(stack.initial_task_id, "planner");
}

#[test]
fn test_create_stack_is_idempotent_per_request_id() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let request_id = Uuid::new_v4();
    let first = dal
        .stacks()
        .create("planner", &json!({}), Some(request_id))
        .unwrap();
    let second = dal
        .stacks()
        .create("planner", &json!({}), Some(request_id))
        .unwrap();

    assert!(!first.is_duplicate);
    assert!(second.is_duplicate);
    assert_eq!(first.stack_id, second.stack_id);
    assert_eq!(first.root_queue_id, second.root_queue_id);
}

#[test]
fn test_children_claimed_in_author_order_lifo() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let created = dal.stacks().create("planner", &json!({}), None).unwrap();
    let root = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();

    // The planner pushes A, B, C; reverse insertion means the LIFO claim
    // must hand them back as A, then B, then C.
    let planner_result = result_with_output(json!("planned"));
    let output_context = root.input_context.bind(&planner_result);
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: root.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: planner_result.output.clone(),
            output_context: &output_context,
            pushed_tasks: &[push("a"), push("b"), push("c")],
            error_message: None,
        })
        .unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let entry = dal
            .stacks()
            .claim_next(created.stack_id, "w1", 300)
            .unwrap()
            .unwrap();
        order.push(entry.task_id.clone());
        let ctx = entry.input_context.bind(&result_with_output(json!(entry.task_id.clone())));
        dal.stacks()
            .finalize_step(StepFinalization {
                queue_id: entry.queue_id,
                stack_id: created.stack_id,
                status: QueueStatus::Done,
                output: json!(entry.task_id),
                output_context: &ctx,
                pushed_tasks: &[],
                error_message: None,
            })
            .unwrap();
    }
    assert_eq!(order, vec!["a", "b", "c"]);

    // Depth and parentage follow the pushing step.
    let entries = dal.stacks().entries(created.stack_id).unwrap();
    for entry in entries.iter().filter(|e| e.queue_id != root.queue_id) {
        assert_eq!(entry.depth, 1);
        assert_eq!(entry.parent_queue_id, Some(root.queue_id));
    }
}

#[test]
fn test_nested_children_run_depth_first() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let created = dal.stacks().create("root", &json!({}), None).unwrap();
    let root = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    let ctx = root.input_context.bind(&result_with_output(json!("root")));
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: root.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: json!("root"),
            output_context: &ctx,
            pushed_tasks: &[push("first"), push("second")],
            error_message: None,
        })
        .unwrap();

    // "first" pushes a grandchild, which must run before "second".
    let first = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    assert_eq!(first.task_id, "first");
    let ctx = first.input_context.bind(&result_with_output(json!("first")));
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: first.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: json!("first"),
            output_context: &ctx,
            pushed_tasks: &[push("first_child")],
            error_message: None,
        })
        .unwrap();

    let next = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    assert_eq!(next.task_id, "first_child");
    assert_eq!(next.depth, 2);
}

#[test]
fn test_dynamic_context_snapshot_at_claim_time() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let created = dal.stacks().create("planner", &json!({}), None).unwrap();
    let root = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    assert!(root.input_context.outputs.is_empty());

    let ctx = root.input_context.bind(&result_with_output(json!("planned")));
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: root.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: json!("planned"),
            output_context: &ctx,
            pushed_tasks: &[push("a"), push("b")],
            error_message: None,
        })
        .unwrap();

    // Both children were enqueued with one completed step; the second
    // child's snapshot must still observe the first child's output.
    let a = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    assert_eq!(a.input_context.outputs.len(), 1);
    let ctx = a.input_context.bind(&result_with_output(json!("a")));
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: a.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: json!("a"),
            output_context: &ctx,
            pushed_tasks: &[],
            error_message: None,
        })
        .unwrap();

    let b = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    assert_eq!(
        b.input_context.outputs,
        vec![json!("planned"), json!("a")],
        "claim-time snapshot sees every previously completed step"
    );
}

#[test]
fn test_lifo_claim_scoped_to_stack() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let one = dal.stacks().create("a", &json!({}), None).unwrap();
    let two = dal.stacks().create("b", &json!({}), None).unwrap();

    let claimed = dal
        .stacks()
        .claim_next(one.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    assert_eq!(claimed.stack_id, one.stack_id);

    // The other stack's root remains claimable independently.
    let other = dal
        .stacks()
        .claim_next(two.stack_id, "w2", 300)
        .unwrap()
        .unwrap();
    assert_eq!(other.stack_id, two.stack_id);
}

#[test]
fn test_expired_stack_lease_is_stealable() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let created = dal.stacks().create("a", &json!({}), None).unwrap();
    let first = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 0)
        .unwrap()
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    let stolen = dal
        .stacks()
        .claim_next(created.stack_id, "w2", 300)
        .unwrap()
        .unwrap();
    assert_eq!(stolen.queue_id, first.queue_id);
    assert_eq!(stolen.worker_id.as_deref(), Some("w2"));
}

#[test]
fn test_finalize_stack_builds_complete_trace() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let created = dal.stacks().create("planner", &json!({}), None).unwrap();
    let root = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    let ctx = root.input_context.bind(&result_with_output(json!("planned")));
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: root.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: json!("planned"),
            output_context: &ctx,
            pushed_tasks: &[push("a")],
            error_message: None,
        })
        .unwrap();
    let a = dal
        .stacks()
        .claim_next(created.stack_id, "w1", 300)
        .unwrap()
        .unwrap();
    let ctx = a.input_context.bind(&result_with_output(json!("a")));
    dal.stacks()
        .finalize_step(StepFinalization {
            queue_id: a.queue_id,
            stack_id: created.stack_id,
            status: QueueStatus::Done,
            output: json!("a"),
            output_context: &ctx,
            pushed_tasks: &[],
            error_message: None,
        })
        .unwrap();

    let stack = dal
        .stacks()
        .finalize_stack(created.stack_id, StackStatus::Done, None)
        .unwrap();

    let entries = dal.stacks().entries(created.stack_id).unwrap();
    let trace = stack.trace.expect("trace persisted");
    assert_eq!(trace.len(), entries.len(), "one trace entry per queue row");
    let mut queue_ids: Vec<i64> = trace.iter().map(|t| t.queue_id).collect();
    let sorted = {
        let mut s = queue_ids.clone();
        s.sort_unstable();
        s
    };
    assert_eq!(queue_ids, sorted, "trace ordered by queue_id");
    queue_ids.dedup();
    assert_eq!(queue_ids.len(), trace.len());

    assert_eq!(stack.status, StackStatus::Done);
    assert!(stack.finished_at.is_some());
    assert_eq!(
        stack.final_output,
        Some(serde_json::to_value(&stack.context).unwrap()),
        "final output is the accumulated context"
    );
}
