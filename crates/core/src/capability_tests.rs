// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::AgentId;

fn template_capability() -> Capability {
    Capability {
        id: CapabilityId::new("c1"),
        agent_id: AgentId::new("a1"),
        key: "echo-msg".to_string(),
        interaction_mode: InteractionMode::Template,
        command_tokens: vec!["echo".to_string(), "{{msg}}".to_string()],
        prompt_template: None,
        args_schema: ArgsSchema::default(),
        danger_level: 0,
        timeout_sec: 5,
        max_output_bytes: 1024 * 1024,
    }
}

#[test]
fn template_capability_is_consistent() {
    assert!(template_capability().payload_consistent());
}

#[test]
fn prompt_capability_is_consistent() {
    let mut cap = template_capability();
    cap.interaction_mode = InteractionMode::Prompt;
    cap.command_tokens.clear();
    cap.prompt_template = Some("Review {{task_title}}".to_string());
    assert!(cap.payload_consistent());
}

#[test]
fn template_capability_with_prompt_is_inconsistent() {
    let mut cap = template_capability();
    cap.prompt_template = Some("stray".to_string());
    assert!(!cap.payload_consistent());
}

#[test]
fn prompt_capability_without_template_is_inconsistent() {
    let mut cap = template_capability();
    cap.interaction_mode = InteractionMode::Prompt;
    cap.command_tokens.clear();
    assert!(!cap.payload_consistent());
}

#[test]
fn args_schema_preserves_property_order() {
    let json = r#"{"properties":{"b":{},"a":{"pattern":"^[a-z]+$"}},"required":["b"]}"#;
    let schema: ArgsSchema = serde_json::from_str(json).unwrap();
    let keys: Vec<_> = schema.properties.keys().cloned().collect();
    assert_eq!(keys, vec!["b", "a"]);
    assert_eq!(
        schema.properties["a"].pattern.as_deref(),
        Some("^[a-z]+$")
    );
}
