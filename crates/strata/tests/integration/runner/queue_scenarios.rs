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

//! End-to-end scenarios driven through the single-shot queue runner.

use serde_json::json;
use strata::models::queue::{FanoutTarget, NewFanout};
use strata::runner::RunOutcome;
use strata::{NewTaskDefinition, QueueRunner, QueueStatus};

use crate::fixtures::TestHarness;

fn runner(harness: &TestHarness) -> QueueRunner {
    QueueRunner::new(harness.database.clone(), harness.config.clone())
}

#[tokio::test]
async fn test_single_shell_task_success() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.tasks()
        .upsert(
            &NewTaskDefinition::shell("echo", "echo 'Hi {who}'")
                .with_default_parameters(json!({"who": "World"})),
        )
        .unwrap();
    let enqueued = dal.queue().enqueue("echo", &json!({}), None).unwrap();

    let RunOutcome::Completed {
        queue_id,
        status,
        artifact,
    } = runner(&harness).run_once().await.unwrap()
    else {
        panic!("expected a completed run");
    };

    assert_eq!(queue_id, enqueued.queue_id);
    assert_eq!(status, QueueStatus::Done);

    let entry = dal.queue().get(queue_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Done);
    assert!(entry.finished_at.is_some());

    // The artifact carries one shell action with the captured stdout and no
    // fan-out.
    let artifact = artifact.expect("artifact written");
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
    assert_eq!(record["status"], json!("done"));
    assert_eq!(record["actions"].as_array().unwrap().len(), 1);
    assert_eq!(record["actions"][0]["kind"], json!("shell"));
    assert_eq!(record["actions"][0]["exit_code"], json!(0));
    assert!(record["actions"][0]["stdout"]["content"]
        .as_str()
        .unwrap()
        .contains("Hi World"));
    assert!(record["fanout"].as_array().unwrap().is_empty());
    let filename = artifact.file_name().unwrap().to_str().unwrap();
    assert!(filename.starts_with("run_echo_"));
}

#[tokio::test]
async fn test_parameter_override_beats_default() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.tasks()
        .upsert(
            &NewTaskDefinition::shell("echo", "echo 'Hi {who}'")
                .with_default_parameters(json!({"who": "World"})),
        )
        .unwrap();
    dal.queue()
        .enqueue("echo", &json!({"who": "Strata"}), None)
        .unwrap();

    let outcome = runner(&harness).run_once().await.unwrap();
    let RunOutcome::Completed { artifact, .. } = outcome else {
        panic!("expected completion");
    };
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifact.unwrap()).unwrap()).unwrap();
    assert!(record["actions"][0]["stdout"]["content"]
        .as_str()
        .unwrap()
        .contains("Hi Strata"));
    assert_eq!(record["merged_parameters"]["who"], json!("Strata"));
}

#[tokio::test]
async fn test_empty_queue_reports_no_task() {
    let harness = TestHarness::new();
    let outcome = runner(&harness).run_once().await.unwrap();
    assert!(matches!(outcome, RunOutcome::NoTask));
}

#[tokio::test]
async fn test_kill_switch_blocks_claiming() {
    let harness = TestHarness::new();
    let dal = harness.dal();
    harness.shell_task("echo", "echo hi");
    dal.queue().enqueue("echo", &json!({}), None).unwrap();

    dal.control().set_flag("kill_all", true).unwrap();
    assert!(matches!(
        runner(&harness).run_once().await.unwrap(),
        RunOutcome::Killed
    ));

    dal.control().set_flag("kill_all", false).unwrap();
    dal.control().set_flag("pause_new_tasks", true).unwrap();
    assert!(matches!(
        runner(&harness).run_once().await.unwrap(),
        RunOutcome::NoTask
    ));

    // The entry is untouched either way.
    assert_eq!(dal.queue().queued_count().unwrap(), 1);
}

#[tokio::test]
async fn test_missing_definition_fails_entry() {
    let harness = TestHarness::new();
    let dal = harness.dal();
    dal.queue().enqueue("ghost", &json!({}), None).unwrap();

    let outcome = runner(&harness).run_once().await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed {
            status: QueueStatus::Failed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_disabled_definition_cancels_entry() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    harness.shell_task("echo", "echo hi");
    dal.tasks().set_enabled("echo", false).unwrap();
    dal.queue().enqueue("echo", &json!({}), None).unwrap();

    let outcome = runner(&harness).run_once().await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed {
            status: QueueStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_failing_task_finalizes_failed() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    harness.shell_task("boom", "echo oops >&2; exit 7");
    dal.queue().enqueue("boom", &json!({}), None).unwrap();

    let RunOutcome::Completed {
        status, artifact, ..
    } = runner(&harness).run_once().await.unwrap()
    else {
        panic!("expected completion");
    };
    assert_eq!(status, QueueStatus::Failed);

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifact.unwrap()).unwrap()).unwrap();
    assert_eq!(record["actions"][0]["exit_code"], json!(7));
    assert!(record["actions"][0]["stderr"]["content"]
        .as_str()
        .unwrap()
        .contains("oops"));
}

#[tokio::test]
async fn test_cancellation_during_execution_overrides_outcome() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    harness.shell_task("slow", "sleep 1");
    let enqueued = dal.queue().enqueue("slow", &json!({}), None).unwrap();

    // Another actor cancels the row while the child sleeps.
    let cancel_dal = harness.dal();
    let queue_id = enqueued.queue_id;
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel_dal.queue().cancel(queue_id).unwrap();
    });

    let RunOutcome::Completed {
        status, artifact, ..
    } = runner(&harness).run_once().await.unwrap()
    else {
        panic!("expected completion");
    };
    canceller.await.unwrap();

    assert_eq!(status, QueueStatus::Cancelled);
    assert_eq!(
        dal.queue().status_of(queue_id).unwrap(),
        Some(QueueStatus::Cancelled)
    );
    // The artifact still records the action.
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifact.unwrap()).unwrap()).unwrap();
    assert_eq!(record["status"], json!("cancelled"));
    assert_eq!(record["actions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_successful_parent_fans_out_children() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    harness.shell_task("parent", "echo done");
    harness.shell_task("child", "echo 'Hello {greeting}'");
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

    let RunOutcome::Completed { status, .. } = runner(&harness).run_once().await.unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(status, QueueStatus::Done);

    // The child is now queued and runnable.
    assert_eq!(dal.queue().queued_count().unwrap(), 1);
    let RunOutcome::Completed { status, .. } = runner(&harness).run_once().await.unwrap() else {
        panic!("expected child completion");
    };
    assert_eq!(status, QueueStatus::Done);
}

#[tokio::test]
async fn test_failed_parent_does_not_fan_out() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    harness.shell_task("parent", "exit 1");
    harness.shell_task("child", "echo hi");
    let parent = dal.queue().enqueue("parent", &json!({}), None).unwrap();
    dal.queue()
        .record_fanout(&NewFanout {
            parent_queue_id: parent.queue_id,
            target: FanoutTarget::Existing {
                task_id: "child".to_string(),
            },
            parameters: json!({}),
        })
        .unwrap();

    runner(&harness).run_once().await.unwrap();
    assert_eq!(dal.queue().queued_count().unwrap(), 0);
    let records = dal.queue().fanouts_for(parent.queue_id).unwrap();
    assert!(!records[0].processed);
}
