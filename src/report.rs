//! Rendered, write-only markdown artifacts: nothing in the core reads these
//! back.

use std::path::Path;

use crate::state::{LoopState, TaskStatus, VerificationStatus};

pub fn render_implementation_plan(state: &LoopState) -> String {
    let mut out = String::from("# Implementation Plan\n\n");
    for task in state.tasks.values() {
        out.push_str(&format!(
            "- [{}] {} ({}) — {}\n",
            status_box(task.status),
            task.task_id,
            task.status,
            task.description
        ));
    }
    out
}

fn status_box(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Done | TaskStatus::Descoped => "x",
        _ => " ",
    }
}

pub fn render_value_checklist(state: &LoopState) -> String {
    let mut out = String::from("# Value Checklist\n\n");
    if let Some(snapshot) = state.vrc_history.last() {
        out.push_str(&format!(
            "Latest VRC (iteration {}): value_score={:.2}, {}/{} deliverables verified\n\n",
            snapshot.iteration, snapshot.value_score, snapshot.deliverables_verified, snapshot.deliverables_total
        ));
        if !snapshot.gaps.is_empty() {
            out.push_str("Gaps:\n");
            for gap in &snapshot.gaps {
                out.push_str(&format!("- {gap}\n"));
            }
        }
    } else {
        out.push_str("No VRC snapshot recorded yet.\n");
    }
    out
}

pub fn render_delivery_report(state: &LoopState, exit_code: i32) -> String {
    let mut out = String::from("# Delivery Report\n\n");
    out.push_str(&format!("Sprint: {}\n", state.sprint_id));
    out.push_str(&format!("Iterations: {}\n", state.iteration));
    out.push_str(&format!("Exit code: {exit_code}\n\n"));

    let (done, descoped, blocked): (Vec<_>, Vec<_>, Vec<_>) = {
        let mut done = Vec::new();
        let mut descoped = Vec::new();
        let mut blocked = Vec::new();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Done => done.push(task),
                TaskStatus::Descoped => descoped.push(task),
                TaskStatus::Blocked => blocked.push(task),
                _ => {}
            }
        }
        (done, descoped, blocked)
    };

    out.push_str(&format!("## Delivered ({})\n", done.len()));
    for task in done {
        out.push_str(&format!("- {}: {}\n", task.task_id, task.description));
    }

    out.push_str(&format!("\n## Descoped ({})\n", descoped.len()));
    for task in descoped {
        let reason = task.completion_notes.as_deref().unwrap_or("no reason recorded");
        out.push_str(&format!("- {}: {reason}\n", task.task_id));
    }

    out.push_str(&format!("\n## Blocked ({})\n", blocked.len()));
    for task in blocked {
        let reason = task.completion_notes.as_deref().unwrap_or("no reason recorded");
        out.push_str(&format!("- {}: {reason}\n", task.task_id));
    }

    let passing = state
        .verifications
        .values()
        .filter(|v| v.status == VerificationStatus::Passed)
        .count();
    out.push_str(&format!(
        "\n## Verifications\n{passing}/{} passing\n",
        state.verifications.len()
    ));

    out
}

pub fn write_artifacts(state: &LoopState, sprint_dir: &Path, exit_code: i32) -> std::io::Result<()> {
    std::fs::write(sprint_dir.join("IMPLEMENTATION_PLAN.md"), render_implementation_plan(state))?;
    std::fs::write(sprint_dir.join("VALUE_CHECKLIST.md"), render_value_checklist(state))?;
    std::fs::write(
        sprint_dir.join("DELIVERY_REPORT.md"),
        render_delivery_report(state, exit_code),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Task, TaskSource};

    #[test]
    fn delivery_report_separates_tasks_by_outcome() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let mut done = Task::new("T1", "shipped", "v", "a", TaskSource::Plan);
        done.status = TaskStatus::Done;
        let mut blocked = Task::new("T2", "waiting", "v", "a", TaskSource::Plan);
        blocked.status = TaskStatus::Blocked;
        blocked.completion_notes = Some("HUMAN_ACTION: provide key".to_string());
        state.tasks.insert(done.task_id.clone(), done);
        state.tasks.insert(blocked.task_id.clone(), blocked);

        let report = render_delivery_report(&state, 2);
        assert!(report.contains("## Delivered (1)"));
        assert!(report.contains("## Blocked (1)"));
        assert!(report.contains("provide key"));
    }
}
