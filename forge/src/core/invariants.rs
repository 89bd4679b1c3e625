//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::ProjectSpec;

/// Check semantic invariants of a project specification:
/// - At least one task
/// - No duplicate task ids
/// - Dependencies reference existing tasks
/// - Target paths are non-empty and relative (no `..` components)
pub fn validate_invariants(spec: &ProjectSpec) -> Vec<String> {
    let mut errors = Vec::new();
    if spec.tasks.is_empty() {
        errors.push("project must declare at least one task".to_string());
    }

    let mut seen = HashSet::new();
    for task in &spec.tasks {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }

    let known: HashSet<&str> = spec.tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &spec.tasks {
        for dep in &task.dependencies {
            if !known.contains(dep.as_str()) {
                errors.push(format!("task '{}': unknown dependency '{}'", task.id, dep));
            }
        }
        let target = task.relative_target();
        if target.trim().is_empty() {
            errors.push(format!("task '{}': target_path must be non-empty", task.id));
        } else if target.split(['/', '\\']).any(|part| part == "..") {
            errors.push(format!(
                "task '{}': target_path '{}' escapes the project root",
                task.id, task.target_path
            ));
        }
    }
    errors
}
