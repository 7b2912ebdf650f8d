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

//! Cascade rules: registration, matching, template substitution, and
//! duplicate suppression.

use serde_json::json;
use strata::{NewCascadeRule, RequestError, SourceEvent};

use crate::fixtures::TestHarness;

#[test]
fn test_upsert_and_get_rule() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let rule = dal
        .cascade()
        .upsert(&NewCascadeRule::new("on_new_json", "validate_json"))
        .unwrap();
    assert_eq!(rule.rule_id, "on_new_json");
    assert_eq!(rule.task_id, "validate_json");
    assert_eq!(rule.priority, 50);
    assert!(rule.enabled);

    // Upsert replaces in place.
    let mut updated = NewCascadeRule::new("on_new_json", "validate_json");
    updated.priority = 80;
    dal.cascade().upsert(&updated).unwrap();
    assert_eq!(dal.cascade().get("on_new_json").unwrap().unwrap().priority, 80);
    assert_eq!(dal.cascade().list(false).unwrap().len(), 1);
}

#[test]
fn test_invalid_template_rejected() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let mut rule = NewCascadeRule::new("bad", "t");
    rule.parameter_template = "not valid json {".to_string();
    let err = dal.cascade().upsert(&rule).unwrap_err();
    assert!(matches!(err, RequestError::InvalidTemplate(_)));
}

#[test]
fn test_fire_creates_request_with_substituted_parameters() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let mut rule = NewCascadeRule::new("on_json", "validate_json");
    rule.source_kind = Some("json".to_string());
    rule.parameter_template =
        r#"{"source_id": "$source.source_id", "path": "$source.path"}"#.to_string();
    dal.cascade().upsert(&rule).unwrap();

    let event = SourceEvent::new("doc-1", "json").with_field("path", json!("/tmp/doc.json"));
    let created = dal.cascade().fire(&event).unwrap();
    assert_eq!(created.len(), 1);

    let request = dal.requests().get(created[0]).unwrap().unwrap();
    assert_eq!(request.task_id, "validate_json");
    assert_eq!(request.requester, "trigger:on_json");
    assert_eq!(request.triggered_by.as_deref(), Some("on_json"));
    assert_eq!(request.priority, 50);
    assert_eq!(
        request.parameters,
        json!({"source_id": "doc-1", "path": "/tmp/doc.json"})
    );
}

#[test]
fn test_fire_filters_by_source_kind() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    let mut json_rule = NewCascadeRule::new("json_only", "t");
    json_rule.source_kind = Some("json".to_string());
    dal.cascade().upsert(&json_rule).unwrap();

    // A rule without source_kind matches every event.
    dal.cascade()
        .upsert(&NewCascadeRule::new("any_kind", "t"))
        .unwrap();

    let created = dal.cascade().fire(&SourceEvent::new("doc-2", "csv")).unwrap();
    assert_eq!(created.len(), 1);
    let request = dal.requests().get(created[0]).unwrap().unwrap();
    assert_eq!(request.triggered_by.as_deref(), Some("any_kind"));
}

#[test]
fn test_fire_is_idempotent_per_rule_and_source() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.cascade()
        .upsert(&NewCascadeRule::new("rule", "t"))
        .unwrap();

    let event = SourceEvent::new("doc-3", "json");
    let first = dal.cascade().fire(&event).unwrap();
    let second = dal.cascade().fire(&event).unwrap();
    assert_eq!(first.len(), 1);
    assert!(second.is_empty(), "replayed event suppressed as duplicate");
    assert_eq!(dal.requests().list(None).unwrap().len(), 1);
}

#[test]
fn test_disabled_rule_does_not_fire() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.cascade()
        .upsert(&NewCascadeRule::new("rule", "t"))
        .unwrap();
    dal.cascade().set_enabled("rule", false).unwrap();

    assert!(dal
        .cascade()
        .fire(&SourceEvent::new("doc-4", "json"))
        .unwrap()
        .is_empty());

    dal.cascade().set_enabled("rule", true).unwrap();
    assert_eq!(
        dal.cascade()
            .fire(&SourceEvent::new("doc-4", "json"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_triggered_listing_and_delete() {
    let harness = TestHarness::new();
    let dal = harness.dal();

    dal.cascade()
        .upsert(&NewCascadeRule::new("rule", "t"))
        .unwrap();
    dal.cascade().fire(&SourceEvent::new("doc-5", "json")).unwrap();

    let triggered = dal.requests().triggered_by("rule", 20).unwrap();
    assert_eq!(triggered.len(), 1);

    // Deleting the rule leaves its requests behind.
    assert!(dal.cascade().delete("rule").unwrap());
    assert!(dal.cascade().get("rule").unwrap().is_none());
    assert_eq!(dal.requests().triggered_by("rule", 20).unwrap().len(), 1);
}
