// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn agent_with_binary(path: &str) -> Agent {
    Agent {
        id: AgentId::new("a1"),
        name: "Test Agent".to_string(),
        binary_path: PathBuf::from(path),
        default_working_dir: PathBuf::from("/tmp"),
        env_allowlist: vec![],
        max_concurrent: 2,
        active: true,
    }
}

#[parameterized(
    absolute = { "/usr/local/bin/claude", "claude" },
    relative = { "./bin/Codex", "codex" },
    plain = { "gemini", "gemini" },
    mixed_case = { "/opt/Claude", "claude" },
)]
fn binary_basename_lowercases_and_strips_dirs(path: &str, expected: &str) {
    assert_eq!(agent_with_binary(path).binary_basename(), expected);
}

#[test]
fn agent_serde_roundtrip() {
    let agent = agent_with_binary("/usr/bin/claude");
    let json = serde_json::to_string(&agent).unwrap();
    let back: Agent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, agent.id);
    assert_eq!(back.binary_path, agent.binary_path);
    assert_eq!(back.max_concurrent, 2);
}
