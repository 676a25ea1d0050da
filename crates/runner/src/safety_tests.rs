// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agendo_core::PropertySchema;
use yare::parameterized;

fn allowed(dir: &tempfile::TempDir) -> Vec<PathBuf> {
    // Canonicalize so macOS /var → /private/var style indirection does not
    // trip the tests
    vec![dir.path().canonicalize().unwrap()]
}

#[test]
fn working_dir_must_be_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let err = validate_working_dir(Path::new("relative/path"), &allowed(&dir)).unwrap_err();
    assert!(matches!(err, RunnerError::Safety(_)));
}

#[test]
fn working_dir_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let err = validate_working_dir(&missing, &allowed(&dir)).unwrap_err();
    assert!(matches!(err, RunnerError::Safety(_)));
}

#[test]
fn working_dir_inside_allowlist_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("project");
    std::fs::create_dir(&sub).unwrap();
    let resolved = validate_working_dir(&sub, &allowed(&dir)).unwrap();
    assert!(resolved.ends_with("project"));
}

#[test]
fn allowed_root_itself_is_permitted() {
    let dir = tempfile::tempdir().unwrap();
    validate_working_dir(dir.path(), &allowed(&dir)).unwrap();
}

#[test]
fn sibling_directory_with_shared_prefix_is_rejected() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("projects");
    let sibling = parent.path().join("projects2");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::create_dir_all(&sibling).unwrap();

    let allowed = vec![root.canonicalize().unwrap()];
    let err = validate_working_dir(&sibling, &allowed).unwrap_err();
    assert!(matches!(err, RunnerError::Safety(_)));
}

#[test]
fn symlink_escaping_the_allowlist_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let link = dir.path().join("innocent");
    std::os::unix::fs::symlink(outside.path(), &link).unwrap();

    // The raw path sits inside the allowed root; realpath does not
    let err = validate_working_dir(&link, &allowed(&dir)).unwrap_err();
    assert!(matches!(err, RunnerError::Safety(_)));
}

#[test]
#[serial_test::serial(env)]
fn child_env_is_built_from_scratch() {
    std::env::set_var("AGENDO_SECRET_TOKEN", "hunter2");
    std::env::set_var("HOME", "/home/tester");

    let env = build_child_env(&[], &HashMap::new());
    let names: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();

    assert!(!names.contains(&"AGENDO_SECRET_TOKEN"));
    assert!(names.contains(&"HOME"));
    assert!(env.contains(&("TERM".to_string(), "xterm-256color".to_string())));
    assert!(env.contains(&("COLORTERM".to_string(), "truecolor".to_string())));
}

#[test]
#[serial_test::serial(env)]
fn agent_allowlist_admits_extra_variables() {
    std::env::set_var("ANTHROPIC_API_KEY", "key-123");
    let env = build_child_env(&["ANTHROPIC_API_KEY".to_string()], &HashMap::new());
    assert!(env.contains(&("ANTHROPIC_API_KEY".to_string(), "key-123".to_string())));
}

#[test]
fn overrides_apply_only_to_allowlisted_names() {
    let mut overrides = HashMap::new();
    overrides.insert("TMPDIR".to_string(), "/scratch".to_string());
    overrides.insert("LD_PRELOAD".to_string(), "/evil.so".to_string());

    let env = build_child_env(&[], &overrides);
    assert!(env.contains(&("TMPDIR".to_string(), "/scratch".to_string())));
    assert!(!env.iter().any(|(k, _)| k == "LD_PRELOAD"));
}

#[test]
fn term_cannot_be_overridden() {
    let mut overrides = HashMap::new();
    overrides.insert("TERM".to_string(), "dumb".to_string());
    let env = build_child_env(&[], &overrides);
    let terms: Vec<_> = env.iter().filter(|(k, _)| k == "TERM").collect();
    assert_eq!(terms, vec![&("TERM".to_string(), "xterm-256color".to_string())]);
}

#[test]
fn command_args_substitute_whole_token_placeholders() {
    let tokens = vec!["echo".to_string(), "{{msg}}".to_string()];
    let mut args = HashMap::new();
    args.insert("msg".to_string(), "hello".to_string());
    assert_eq!(build_command_args(&tokens, &args).unwrap(), vec!["echo", "hello"]);
}

#[test]
fn command_args_reject_missing_argument() {
    let tokens = vec!["echo".to_string(), "{{msg}}".to_string()];
    let err = build_command_args(&tokens, &HashMap::new()).unwrap_err();
    assert!(matches!(err, RunnerError::Safety(_)));
}

#[parameterized(
    semicolon = { "a;b" },
    backtick = { "`id`" },
    dollar = { "$(id)" },
    pipe = { "a|b" },
    newline = { "a\nb" },
    ampersand = { "a&&b" },
)]
fn command_args_reject_unsafe_characters(value: &str) {
    let tokens = vec!["echo".to_string(), "{{msg}}".to_string()];
    let mut args = HashMap::new();
    args.insert("msg".to_string(), value.to_string());
    let err = build_command_args(&tokens, &args).unwrap_err();
    assert!(matches!(err, RunnerError::Safety(_)), "value: {value:?}");
}

#[test]
fn command_args_allow_the_documented_charset() {
    let tokens = vec!["tool".to_string(), "{{arg}}".to_string()];
    let mut args = HashMap::new();
    args.insert(
        "arg".to_string(),
        "path/to/file.txt,user@host#tag:v=1+2 -x".to_string(),
    );
    build_command_args(&tokens, &args).unwrap();
}

#[test]
fn embedded_placeholders_are_left_verbatim() {
    // Only whole-token placeholders substitute
    let tokens = vec!["prefix-{{msg}}".to_string()];
    let out = build_command_args(&tokens, &HashMap::new()).unwrap();
    assert_eq!(out, vec!["prefix-{{msg}}"]);
}

#[test]
fn validate_args_enforces_required_and_pattern() {
    let mut schema = ArgsSchema::default();
    schema.required.push("branch".to_string());
    schema.properties.insert(
        "branch".to_string(),
        PropertySchema {
            pattern: Some("^[a-z][a-z0-9-]*$".to_string()),
            description: None,
        },
    );

    let err = validate_args(&schema, &HashMap::new()).unwrap_err();
    assert!(matches!(err, RunnerError::Validation(_)));

    let mut args = HashMap::new();
    args.insert("branch".to_string(), "Feature/X".to_string());
    let err = validate_args(&schema, &args).unwrap_err();
    assert!(matches!(err, RunnerError::Validation(_)));

    args.insert("branch".to_string(), "feature-x".to_string());
    validate_args(&schema, &args).unwrap();
}

#[test]
fn scalar_conversion_rejects_objects_and_arrays() {
    let mut raw = HashMap::new();
    raw.insert("ok".to_string(), serde_json::json!("text"));
    raw.insert("n".to_string(), serde_json::json!(42));
    let args = require_scalar_args(&raw).unwrap();
    assert_eq!(args["n"], "42");

    raw.insert("bad".to_string(), serde_json::json!({"nested": true}));
    let err = require_scalar_args(&raw).unwrap_err();
    assert!(matches!(err, RunnerError::Validation(_)));
}

#[test]
fn binary_must_have_executable_bit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tool");
    std::fs::write(&path, "#!/bin/sh\n").unwrap();

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
    assert!(matches!(
        validate_binary(&path).unwrap_err(),
        RunnerError::Safety(_)
    ));

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    validate_binary(&path).unwrap();
}
