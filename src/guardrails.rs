//! Task mutation guardrails: validation run before every `manage_task` call.

use std::collections::{BTreeSet, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::config::LoopConfig;
use crate::error::DispatchError;
use crate::state::{LoopState, Task, TaskStatus};

pub enum TaskMutation {
    Add(Task),
    Modify {
        task_id: String,
        dependencies: Option<BTreeSet<String>>,
        description: Option<String>,
        status: Option<TaskStatus>,
    },
    Remove {
        task_id: String,
    },
}

/// Word-set Jaccard similarity used for near-duplicate-task rejection.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Whether adding `candidate` as a dependency edge for `task_id` keeps the
/// dependency graph acyclic, given the state of all other tasks.
fn dependencies_are_acyclic(
    state: &LoopState,
    task_id: &str,
    new_dependencies: &BTreeSet<String>,
) -> bool {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices = std::collections::HashMap::new();
    for id in state.tasks.keys() {
        let idx = graph.add_node(id.as_str());
        indices.insert(id.as_str(), idx);
    }
    if !indices.contains_key(task_id) {
        indices.insert(task_id, graph.add_node(task_id));
    }
    for (id, task) in &state.tasks {
        let deps = if id == task_id {
            new_dependencies
        } else {
            &task.dependencies
        };
        for dep in deps {
            if let (Some(&from), Some(&to)) = (indices.get(id.as_str()), indices.get(dep.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
    }
    !is_cyclic_directed(&graph)
}

pub fn validate_mutation(
    state: &LoopState,
    config: &LoopConfig,
    mutation: &TaskMutation,
) -> Result<(), DispatchError> {
    match mutation {
        TaskMutation::Add(task) => validate_add(state, config, task),
        TaskMutation::Modify {
            task_id,
            dependencies,
            ..
        } => validate_modify(state, task_id, dependencies.as_ref()),
        TaskMutation::Remove { task_id } => validate_remove(state, task_id),
    }
}

fn validate_add(state: &LoopState, config: &LoopConfig, task: &Task) -> Result<(), DispatchError> {
    if task.description.trim().is_empty()
        || task.value.trim().is_empty()
        || task.acceptance.trim().is_empty()
    {
        return Err(DispatchError::validation(
            "description, value, and acceptance are required",
        ));
    }
    if task.description.chars().count() as u32 > config.max_task_description_chars {
        return Err(DispatchError::validation(format!(
            "description exceeds {} characters",
            config.max_task_description_chars
        )));
    }
    if task.expected_files.len() as u32 > config.max_expected_files {
        return Err(DispatchError::validation(format!(
            "expected_files exceeds cap of {}",
            config.max_expected_files
        )));
    }
    for dep in &task.dependencies {
        if !state.tasks.contains_key(dep) {
            return Err(DispatchError::validation(format!(
                "dependency {dep} does not exist"
            )));
        }
    }
    if task.source.is_mid_loop() {
        if state.mid_loop_task_count() >= config.max_mid_loop_tasks {
            return Err(DispatchError::validation(format!(
                "mid-loop task cap of {} reached",
                config.max_mid_loop_tasks
            )));
        }
        for existing in state.tasks.values() {
            if matches!(existing.status, TaskStatus::Done | TaskStatus::Descoped) {
                continue;
            }
            if jaccard_similarity(&task.description, &existing.description)
                >= config.duplicate_similarity_threshold
            {
                return Err(DispatchError::validation(format!(
                    "too similar to existing task {}",
                    existing.task_id
                )));
            }
        }
    }
    if !dependencies_are_acyclic(state, &task.task_id, &task.dependencies) {
        return Err(DispatchError::validation("dependency graph would be cyclic"));
    }
    Ok(())
}

fn validate_modify(
    state: &LoopState,
    task_id: &str,
    dependencies: Option<&BTreeSet<String>>,
) -> Result<(), DispatchError> {
    if !state.tasks.contains_key(task_id) {
        return Err(DispatchError::validation(format!(
            "task {task_id} does not exist"
        )));
    }
    if let Some(deps) = dependencies {
        for dep in deps {
            if !state.tasks.contains_key(dep) {
                return Err(DispatchError::validation(format!(
                    "dependency {dep} does not exist"
                )));
            }
        }
        if !dependencies_are_acyclic(state, task_id, deps) {
            return Err(DispatchError::validation("dependency graph would be cyclic"));
        }
    }
    Ok(())
}

fn validate_remove(state: &LoopState, task_id: &str) -> Result<(), DispatchError> {
    if !state.tasks.contains_key(task_id) {
        return Err(DispatchError::validation(format!(
            "task {task_id} does not exist"
        )));
    }
    let has_dependents = state
        .tasks
        .values()
        .any(|t| t.task_id != task_id && t.dependencies.contains(task_id));
    if has_dependents {
        return Err(DispatchError::validation(format!(
            "task {task_id} has dependents and cannot be removed"
        )));
    }
    Ok(())
}
