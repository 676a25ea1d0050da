// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safety checks applied before anything is spawned.
//!
//! Working directories are realpath-resolved *before* the allow-list check
//! (the order defeats symlink traversal), child environments are built
//! from scratch rather than inherited, and template arguments must pass a
//! conservative character filter.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use agendo_core::ArgsSchema;

use crate::error::RunnerError;

/// Environment variables copied from the parent when present, regardless
/// of agent configuration.
const BASE_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TMPDIR", "TZ"];

/// Characters allowed in substituted template arguments.
const SAFE_ARG_PATTERN: &str = r"^[A-Za-z0-9\s/_.,@#:=+\-]*$";

/// Validate a working directory against the allow-list.
///
/// Rejects non-absolute and non-existing paths, then resolves symlinks and
/// requires the *resolved* path to equal, or sit strictly under, one of the
/// allowed roots. Returns the resolved path; the child always runs at the
/// real location.
pub fn validate_working_dir(path: &Path, allowed: &[PathBuf]) -> Result<PathBuf, RunnerError> {
    if !path.is_absolute() {
        return Err(RunnerError::Safety(format!(
            "working directory is not absolute: {}",
            path.display()
        )));
    }
    if !path.exists() {
        return Err(RunnerError::Safety(format!(
            "working directory does not exist: {}",
            path.display()
        )));
    }

    // realpath before the allow-list check; checking the raw path would let
    // a symlink inside an allowed root escape it
    let resolved = path.canonicalize().map_err(|e| {
        RunnerError::Safety(format!("cannot resolve {}: {e}", path.display()))
    })?;

    let permitted = allowed.iter().any(|root| resolved.starts_with(root));
    if !permitted {
        return Err(RunnerError::Safety(format!(
            "working directory {} resolves outside the allow-list",
            path.display()
        )));
    }

    Ok(resolved)
}

/// Build the child environment from scratch.
///
/// Only the base allow-list plus the agent's extra allow-list are copied
/// from the parent; `TERM` and `COLORTERM` are always set. The parent
/// environment is never spread into the child.
pub fn build_child_env(
    agent_allowlist: &[String],
    overrides: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut env = Vec::new();

    for name in BASE_ENV_ALLOWLIST
        .iter()
        .copied()
        .chain(agent_allowlist.iter().map(String::as_str))
    {
        if let Ok(value) = std::env::var(name) {
            env.push((name.to_string(), value));
        }
    }

    for (name, value) in overrides {
        if BASE_ENV_ALLOWLIST.contains(&name.as_str())
            || agent_allowlist.iter().any(|a| a == name)
        {
            env.retain(|(existing, _)| existing != name);
            env.push((name.clone(), value.clone()));
        }
    }

    env.retain(|(name, _)| name != "TERM" && name != "COLORTERM");
    env.push(("TERM".to_string(), "xterm-256color".to_string()));
    env.push(("COLORTERM".to_string(), "truecolor".to_string()));
    env
}

/// Substitute `{{name}}` placeholders in a template token list.
///
/// A placeholder must be the whole token. Missing arguments and values
/// containing anything outside the safe character set are rejected; the
/// argument map holds scalars only, so objects/arrays are rejected at the
/// schema layer before they reach here.
pub fn build_command_args(
    tokens: &[String],
    args: &HashMap<String, String>,
) -> Result<Vec<String>, RunnerError> {
    let placeholder = regex_for(r"^\{\{(\w+)\}\}$")?;
    let safe = regex_for(SAFE_ARG_PATTERN)?;

    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match placeholder.captures(token) {
            Some(caps) => {
                let name = &caps[1];
                let value = args.get(name).ok_or_else(|| {
                    RunnerError::Safety(format!("missing argument for placeholder: {name}"))
                })?;
                if !safe.is_match(value) {
                    return Err(RunnerError::Safety(format!(
                        "argument {name} contains unsafe characters"
                    )));
                }
                out.push(value.clone());
            }
            None => out.push(token.clone()),
        }
    }
    Ok(out)
}

/// Validate arguments against a capability schema: enforce `required` and
/// per-property `pattern`. Values are scalars by construction (the map is
/// string-valued); raw JSON inputs must be rejected as objects/arrays by
/// the boundary before conversion.
pub fn validate_args(schema: &ArgsSchema, args: &HashMap<String, String>) -> Result<(), RunnerError> {
    for name in &schema.required {
        if !args.contains_key(name) {
            return Err(RunnerError::Validation(format!(
                "missing required argument: {name}"
            )));
        }
    }

    for (name, value) in args {
        if let Some(property) = schema.properties.get(name) {
            if let Some(pattern) = &property.pattern {
                let re = regex_for(pattern)?;
                if !re.is_match(value) {
                    return Err(RunnerError::Validation(format!(
                        "argument {name} does not match pattern {pattern}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Reject raw JSON argument values that are not scalars.
pub fn require_scalar_args(
    raw: &HashMap<String, serde_json::Value>,
) -> Result<HashMap<String, String>, RunnerError> {
    let mut args = HashMap::with_capacity(raw.len());
    for (name, value) in raw {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                return Err(RunnerError::Validation(format!(
                    "argument {name} must be a scalar"
                )));
            }
        };
        args.insert(name.clone(), text);
    }
    Ok(args)
}

/// Check the binary has its executable bit set.
pub fn validate_binary(path: &Path) -> Result<(), RunnerError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        RunnerError::Safety(format!("binary not accessible: {}: {e}", path.display()))
    })?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(RunnerError::Safety(format!(
            "binary is not executable: {}",
            path.display()
        )));
    }
    Ok(())
}

fn regex_for(pattern: &str) -> Result<regex::Regex, RunnerError> {
    regex::Regex::new(pattern)
        .map_err(|e| RunnerError::Validation(format!("invalid pattern {pattern}: {e}")))
}

#[cfg(test)]
#[path = "safety_tests.rs"]
mod tests;
