// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt template interpolation.
//!
//! `{{name}}` placeholders resolve from the task (`task_title`,
//! `task_description`), dotted paths into the input context
//! (`input_context.prompt_additions`), and the execution's argument map.
//! Unresolved placeholders expand to empty.

use std::collections::HashMap;

use agendo_core::Task;

/// Interpolate a prompt template for a task and argument map.
pub fn resolve_prompt(template: &str, task: &Task, args: &HashMap<String, String>) -> String {
    interpolate(template, |name| lookup(name, task, args))
}

fn lookup(name: &str, task: &Task, args: &HashMap<String, String>) -> Option<String> {
    match name {
        "task_title" => return Some(task.title.clone()),
        "task_description" => return Some(task.description.clone()),
        _ => {}
    }

    if let Some(rest) = name.strip_prefix("input_context.") {
        return match rest {
            "prompt_additions" => task.input_context.prompt_additions.clone(),
            "working_dir" => task
                .input_context
                .working_dir
                .as_ref()
                .map(|p| p.display().to_string()),
            key => task
                .input_context
                .args
                .get(key)
                .or_else(|| task.input_context.env.get(key))
                .cloned(),
        };
    }

    args.get(name).cloned()
}

/// Replace every `{{name}}` (dotted names allowed) using the resolver;
/// unresolved names expand to empty.
fn interpolate(template: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                if is_placeholder_name(name) {
                    if let Some(value) = resolve(name) {
                        out.push_str(&value);
                    }
                } else {
                    // Not a placeholder; keep the braces verbatim
                    out.push_str("{{");
                    out.push_str(&after[..end]);
                    out.push_str("}}");
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
