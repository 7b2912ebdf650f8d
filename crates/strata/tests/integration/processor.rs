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

//! Request dispatcher end-to-end: claiming, stack execution, result
//! mirroring, and dependency resolution.

use std::time::Duration;

use serde_json::json;
use strata::{NewTaskRequest, RequestProcessor, RequestStatus};

use crate::fixtures::TestHarness;

fn processor(harness: &TestHarness) -> RequestProcessor {
    RequestProcessor::new(
        harness.database.clone(),
        harness.config.clone(),
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn test_request_runs_as_stack_and_mirrors_done() {
    let harness = TestHarness::new();
    harness.result_task("ok", r#"{"__task_result__": true, "output": "fine"}"#);
    let dal = harness.dal();

    let submitted = dal
        .requests()
        .submit(&NewTaskRequest::new("ok", json!({})))
        .unwrap();

    let mut processor = processor(&harness);
    assert!(processor.process_one().await.unwrap());

    let request = dal.requests().get(submitted.request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Done);
    let result_ref = request.result_ref.expect("result ref recorded");
    assert!(result_ref.starts_with("stack_"));

    // The result ref names the emitted stack artifact.
    let path = harness.config.runs_dir.join(format!("{result_ref}.json"));
    assert!(path.is_file(), "artifact exists at {}", path.display());
}

#[tokio::test]
async fn test_empty_request_queue_processes_nothing() {
    let harness = TestHarness::new();
    let mut processor = processor(&harness);
    assert!(!processor.process_one().await.unwrap());
}

#[tokio::test]
async fn test_aborting_stack_marks_request_failed() {
    let harness = TestHarness::new();
    harness.result_task(
        "bad",
        r#"{"__task_result__": true, "abort": true, "errors": ["stop"]}"#,
    );
    let dal = harness.dal();

    let submitted = dal
        .requests()
        .submit(&NewTaskRequest::new("bad", json!({})))
        .unwrap();

    let mut processor = processor(&harness);
    assert!(processor.process_one().await.unwrap());

    let request = dal.requests().get(submitted.request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.error.as_deref(), Some("Task requested abort"));
}

#[tokio::test]
async fn test_dependency_chain_executes_in_order() {
    let harness = TestHarness::new();
    harness.result_task("ok", r#"{"__task_result__": true, "output": "fine"}"#);
    let dal = harness.dal();

    let r1 = dal
        .requests()
        .submit(&NewTaskRequest::new("ok", json!({})))
        .unwrap();
    let r2 = dal
        .requests()
        .submit(&NewTaskRequest::new("ok", json!({})).depends_on(vec![r1.request_id]))
        .unwrap();
    assert_eq!(r2.status, RequestStatus::Blocked);

    let mut processor = processor(&harness);

    // First pass can only pick up R1; completing it unblocks R2.
    assert!(processor.process_one().await.unwrap());
    assert_eq!(
        dal.requests().get(r1.request_id).unwrap().unwrap().status,
        RequestStatus::Done
    );
    assert_eq!(
        dal.requests().get(r2.request_id).unwrap().unwrap().status,
        RequestStatus::Pending
    );

    assert!(processor.process_one().await.unwrap());
    assert_eq!(
        dal.requests().get(r2.request_id).unwrap().unwrap().status,
        RequestStatus::Done
    );
}

#[tokio::test]
async fn test_request_parameters_reach_the_stack() {
    let harness = TestHarness::new();
    harness.shell_task(
        "greeter",
        r#"echo "{\"__task_result__\": true, \"output\": \"Hello {name}\"}""#,
    );
    let dal = harness.dal();

    let submitted = dal
        .requests()
        .submit(&NewTaskRequest::new("greeter", json!({"name": "Agent"})))
        .unwrap();

    let mut processor = processor(&harness);
    assert!(processor.process_one().await.unwrap());

    let request = dal.requests().get(submitted.request_id).unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Done);

    let result_ref = request.result_ref.unwrap();
    let record: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(harness.config.runs_dir.join(format!("{result_ref}.json")))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(record["final_context"]["outputs"][0], json!("Hello Agent"));
}

#[tokio::test]
async fn test_stats_reports_worker_and_queue_counts() {
    let harness = TestHarness::new();
    harness.result_task("ok", r#"{"__task_result__": true, "output": "fine"}"#);
    let dal = harness.dal();

    dal.requests()
        .submit(&NewTaskRequest::new("ok", json!({})))
        .unwrap();
    dal.requests()
        .submit(&NewTaskRequest::new("ok", json!({})))
        .unwrap();

    let mut processor = processor(&harness);
    assert!(processor.process_one().await.unwrap());

    let stats = processor.stats().unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.queue.get("pending"), Some(&1));
    assert_eq!(stats.queue.get("done"), Some(&1));
    assert!(stats.worker_id.contains(':'));
}
