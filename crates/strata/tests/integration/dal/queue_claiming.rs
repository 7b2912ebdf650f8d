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

//! Claiming semantics of the single-shot queue: FIFO order, idempotent
//! enqueue, lease expiry stealing, exclusivity under concurrency, and
//! terminal immutability.

use std::collections::HashSet;

use serde_json::json;
use strata::models::queue::FanoutTarget;
use strata::models::queue::NewFanout;
use strata::QueueStatus;
use uuid::Uuid;

use crate::fixtures::TestHarness;

#[test]
fn test_enqueue_then_claim_transitions_to_running() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let outcome = dal.queue().enqueue("echo", &json!({}), None).unwrap();
    assert!(!outcome.is_duplicate);
    assert_eq!(outcome.status, QueueStatus::Queued);

    let entry = dal.queue().claim_next("w1", 300).unwrap().unwrap();
    assert_eq!(entry.queue_id, outcome.queue_id);
    assert_eq!(entry.status, QueueStatus::Running);
    assert_eq!(entry.worker_id.as_deref(), Some("w1"));
    assert!(entry.lease_expires_at.is_some());
    assert!(entry.started_at.is_some());
}

#[test]
fn test_fifo_order_among_eligible_rows() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let first = dal.queue().enqueue("a", &json!({}), None).unwrap();
    let second = dal.queue().enqueue("b", &json!({}), None).unwrap();
    assert!(first.queue_id < second.queue_id);

    let claimed_first = dal.queue().claim_next("w1", 300).unwrap().unwrap();
    let claimed_second = dal.queue().claim_next("w1", 300).unwrap().unwrap();
    assert_eq!(claimed_first.queue_id, first.queue_id);
    assert_eq!(claimed_second.queue_id, second.queue_id);
}

#[test]
fn test_enqueue_is_idempotent_per_request_id() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let request_id = Uuid::new_v4();
    let first = dal
        .queue()
        .enqueue("echo", &json!({"n": 1}), Some(request_id))
        .unwrap();
    let second = dal
        .queue()
        .enqueue("echo", &json!({"n": 2}), Some(request_id))
        .unwrap();

    assert!(!first.is_duplicate);
    assert!(second.is_duplicate);
    assert_eq!(first.queue_id, second.queue_id);
}

#[test]
fn test_expired_lease_is_stealable() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.queue().enqueue("echo", &json!({}), None).unwrap();

    // Lease of zero seconds expires immediately.
    let first = dal.queue().claim_next("w1", 0).unwrap().unwrap();
    assert_eq!(first.worker_id.as_deref(), Some("w1"));

    std::thread::sleep(std::time::Duration::from_millis(10));
    let stolen = dal.queue().claim_next("w2", 300).unwrap().unwrap();
    assert_eq!(stolen.queue_id, first.queue_id);
    assert_eq!(stolen.worker_id.as_deref(), Some("w2"));
    assert!(stolen.started_at >= first.started_at);
}

#[test]
fn test_live_lease_is_not_stealable() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.queue().enqueue("echo", &json!({}), None).unwrap();
    dal.queue().claim_next("w1", 300).unwrap().unwrap();
    assert!(dal.queue().claim_next("w2", 300).unwrap().is_none());
}

#[test]
fn test_concurrent_claimers_each_row_claimed_once() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let total = 8;
    for i in 0..total {
        dal.queue()
            .enqueue("echo", &json!({"i": i}), None)
            .unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..4 {
        let database = harness.database.clone();
        handles.push(std::thread::spawn(move || {
            let dal = strata::DAL::new(database);
            let worker_id = format!("w{worker}");
            let mut claimed = Vec::new();
            while let Some(entry) = dal.queue().claim_next(&worker_id, 300).unwrap() {
                claimed.push(entry.queue_id);
            }
            claimed
        }));
    }

    let mut all: Vec<i64> = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    assert_eq!(all.len(), total, "every row claimed exactly once");
    let distinct: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(distinct.len(), total, "no row claimed twice");
}

#[test]
fn test_finalize_clears_lease_and_is_terminal() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let outcome = dal.queue().enqueue("echo", &json!({}), None).unwrap();
    dal.queue().claim_next("w1", 0).unwrap().unwrap();
    dal.queue()
        .finalize(outcome.queue_id, QueueStatus::Done)
        .unwrap();

    let entry = dal.queue().get(outcome.queue_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Done);
    assert!(entry.lease_expires_at.is_none());
    assert!(entry.finished_at.is_some());

    // Terminal rows are neither claimable nor cancellable.
    assert!(dal.queue().claim_next("w2", 300).unwrap().is_none());
    assert!(!dal.queue().cancel(outcome.queue_id).unwrap());
    let entry = dal.queue().get(outcome.queue_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Done);
}

#[test]
fn test_cancel_queued_entry() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let outcome = dal.queue().enqueue("echo", &json!({}), None).unwrap();
    assert!(dal.queue().cancel(outcome.queue_id).unwrap());
    assert_eq!(
        dal.queue().status_of(outcome.queue_id).unwrap(),
        Some(QueueStatus::Cancelled)
    );
    assert!(dal.queue().claim_next("w1", 300).unwrap().is_none());
}

#[test]
fn test_control_flags_round_trip() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    assert!(!dal.control().flag("kill_all").unwrap());
    dal.control().set_flag("kill_all", true).unwrap();
    assert!(dal.control().flag("kill_all").unwrap());
    dal.control().set_flag("kill_all", false).unwrap();
    assert!(!dal.control().flag("kill_all").unwrap());
    // Unknown flags read as unset.
    assert!(!dal.control().flag("no_such_flag").unwrap());
}

#[test]
fn test_fanout_processing_enqueues_children_atomically() {
    let harness = TestHarness::new();
    let dal = harness.dal();
    harness.shell_task("child", "echo child");

    let parent = dal.queue().enqueue("parent", &json!({}), None).unwrap();
    dal.queue()
        .record_fanout(&NewFanout {
            parent_queue_id: parent.queue_id,
            target: FanoutTarget::Existing {
                task_id: "child".to_string(),
            },
            parameters: json!({"greeting": "Child-0"}),
        })
        .unwrap();
    dal.queue()
        .record_fanout(&NewFanout {
            parent_queue_id: parent.queue_id,
            target: FanoutTarget::Inline {
                kind: strata::TaskKind::Shell,
                interpreter: strata::Interpreter::Sh,
                code: "echo inline child".to_string(),
                timeout_seconds: 60,
            },
            parameters: json!({}),
        })
        .unwrap();

    let children = dal.queue().process_fanouts(parent.queue_id).unwrap();
    assert_eq!(children.len(), 2);

    // All fanout rows flip to processed; re-processing is a no-op.
    let records = dal.queue().fanouts_for(parent.queue_id).unwrap();
    assert!(records.iter().all(|r| r.processed));
    assert!(dal.queue().process_fanouts(parent.queue_id).unwrap().is_empty());

    // The inline target registered an ephemeral definition.
    let inline_child = dal.queue().get(children[1].queue_id).unwrap().unwrap();
    assert!(inline_child.task_id.starts_with("inline_"));
    let definition = dal.tasks().get(&inline_child.task_id).unwrap().unwrap();
    assert_eq!(definition.code, "echo inline child");
    assert_eq!(definition.timeout_seconds, 60);
}
