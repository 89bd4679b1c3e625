//! Dependency-ordered task scheduling.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::core::types::Task;

/// The dependency relation is not a DAG.
///
/// `unresolved` lists the ids that could never be scheduled, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle among tasks: {}", unresolved.join(", "))]
pub struct CycleError {
    pub unresolved: Vec<String>,
}

/// Order tasks so every task comes after its declared dependencies (Kahn's algorithm).
///
/// Ties break by declaration order: tasks ready at the same time are scheduled
/// first-declared, first-scheduled. Dependencies naming unknown ids are ignored
/// here; [`crate::core::invariants`] rejects them before scheduling.
pub fn order(tasks: &[Task]) -> Result<Vec<&Task>, CycleError> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        let mut seen = Vec::new();
        for dep in &task.dependencies {
            let Some(&producer) = index.get(dep.as_str()) else {
                continue;
            };
            if seen.contains(&producer) {
                continue;
            }
            seen.push(producer);
            dependents[producer].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(tasks.len());
    while let Some(current) = ready.pop_front() {
        ordered.push(&tasks[current]);
        // `dependents` is filled in declaration order, so newly ready tasks keep it.
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if ordered.len() < tasks.len() {
        let unresolved = tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, task)| task.id.clone())
            .collect();
        return Err(CycleError { unresolved });
    }
    Ok(ordered)
}
