//! Decision engine: the pure, priority-ordered `decide` function. Given a
//! snapshot of LoopState and config, returns exactly one Action; first
//! matching priority wins.

use crate::config::LoopConfig;
use crate::state::process_monitor::MonitorStatus;
use crate::state::{LoopState, TaskSource, TaskStatus, VerificationStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    InteractivePause,
    ServiceFix,
    CourseCorrect,
    GenerateQc,
    Fix { verification_id: String },
    Research,
    Execute { task_id: String },
    RunQc,
    CriticalEval,
    CoherenceEval,
    ExitGate { warn_no_verifications: bool },
}

fn in_current_epic_scope(state: &LoopState, epic_id: Option<&str>) -> bool {
    let current = state.current_epic().map(|e| e.id.as_str());
    match (epic_id, current) {
        (None, _) => true,
        (Some(id), Some(c)) => id == c,
        (Some(_), None) => true,
    }
}

fn scoped_tasks<'a>(state: &'a LoopState) -> impl Iterator<Item = &'a crate::state::Task> {
    state
        .tasks
        .values()
        .filter(move |t| in_current_epic_scope(state, t.epic_id.as_deref()))
}

fn is_ready(state: &LoopState, task: &crate::state::Task) -> bool {
    task.status == TaskStatus::Pending
        && task.dependencies.iter().all(|dep| {
            state
                .tasks
                .get(dep)
                .is_some_and(|d| d.status.satisfies_dependency())
        })
}

/// Among ready pending tasks in scope, the one EXECUTE should run next:
/// lowest provenance priority, tie-broken by task id.
pub fn pick_next_task(state: &LoopState) -> Option<String> {
    scoped_tasks(state)
        .filter(|t| is_ready(state, t))
        .min_by(|a, b| {
            a.source
                .priority()
                .cmp(&b.source.priority())
                .then_with(|| a.task_id.cmp(&b.task_id))
        })
        .map(|t| t.task_id.clone())
}

fn is_stuck(state: &LoopState, config: &LoopConfig) -> bool {
    state.iterations_without_progress >= config.max_no_progress
}

fn critical_eval_due(state: &LoopState, config: &LoopConfig) -> bool {
    let interval_elapsed = state.iteration > 0 && state.iteration % config.critical_eval_interval == 0;
    let all_passing = !state.verifications.is_empty()
        && state
            .verifications
            .values()
            .all(|v| v.status == VerificationStatus::Passed);
    let no_prior_high_vrc = !state.vrc_history.iter().any(|v| v.value_score >= 0.9);
    interval_elapsed || (all_passing && no_prior_high_vrc)
}

fn coherence_critical_pending(state: &LoopState) -> bool {
    use crate::state::coherence::CoherenceVerdict;
    state
        .coherence_history
        .last()
        .is_some_and(|r| r.verdict == CoherenceVerdict::Misaligned)
}

pub fn decide(state: &LoopState, config: &LoopConfig) -> Action {
    // P0
    if state.is_paused() {
        return Action::InteractivePause;
    }

    // P1 — service health lives in SprintContext.services; a non-"healthy"
    // value is treated as unhealthy.
    if let Some(context) = &state.context {
        if context.services.values().any(|status| status != "healthy") {
            return Action::ServiceFix;
        }
    }

    // P2
    if is_stuck(state, config) {
        let course_corrections_used = state
            .progress_log
            .iter()
            .filter(|p| p.summary.starts_with("course_correct"))
            .count() as u32;
        if course_corrections_used >= config.max_course_corrections {
            return Action::InteractivePause;
        }
        return Action::CourseCorrect;
    }

    // P3
    let done_count = scoped_tasks(state)
        .filter(|t| t.status == TaskStatus::Done)
        .count() as u32;
    if state.verifications.is_empty()
        && done_count >= config.generate_verifications_after
        && state.gates_passed.contains("plan")
        && !state.research_attempted_for_current_failures
    {
        return Action::GenerateQc;
    }

    // P4
    if let Some(failed) = state
        .verifications
        .values()
        .find(|v| v.status == VerificationStatus::Failed)
    {
        if failed.attempts < config.max_fix_attempts {
            return Action::Fix {
                verification_id: failed.verification_id.clone(),
            };
        }
        if !state.research_attempted_for_current_failures {
            return Action::Research;
        }
        return Action::CourseCorrect;
    }

    // P5
    if scoped_tasks(state).any(|t| {
        t.status == TaskStatus::Blocked
            && t.completion_notes
                .as_deref()
                .is_some_and(|n| n.starts_with("HUMAN_ACTION:"))
    }) {
        return Action::InteractivePause;
    }

    // P6 / P6'
    if let Some(task_id) = pick_next_task(state) {
        return Action::Execute { task_id };
    }
    let any_pending = scoped_tasks(state).any(|t| t.status == TaskStatus::Pending);
    if any_pending {
        return Action::CourseCorrect;
    }

    // P7
    if state
        .verifications
        .values()
        .any(|v| v.status == VerificationStatus::Pending)
    {
        return Action::RunQc;
    }

    // P8 / P8b
    if critical_eval_due(state, config) {
        return Action::CriticalEval;
    }
    if coherence_critical_pending(state) {
        return Action::CoherenceEval;
    }

    // P9 / P9'
    let no_pending = !scoped_tasks(state).any(|t| t.status == TaskStatus::Pending);
    if no_pending {
        if !state.verifications.is_empty()
            && state
                .verifications
                .values()
                .all(|v| v.status == VerificationStatus::Passed)
        {
            return Action::ExitGate {
                warn_no_verifications: false,
            };
        }
        if state.verifications.is_empty() && state.gates_passed.contains("plan") {
            return Action::ExitGate {
                warn_no_verifications: true,
            };
        }
    }

    Action::CourseCorrect
}

/// Whether the process monitor's RED status should trigger a strategy
/// reasoner call on this iteration, independent of `decide`'s own action.
pub fn should_invoke_strategy_reasoner(state: &LoopState) -> bool {
    state.process_monitor.status == MonitorStatus::Red
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Task;

    fn config() -> LoopConfig {
        LoopConfig::default()
    }

    #[test]
    fn pause_outranks_everything() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        state.pause = Some(crate::state::PauseState::new("need input", "please respond"));
        assert_eq!(decide(&state, &config()), Action::InteractivePause);
    }

    #[test]
    fn stuck_state_course_corrects() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        state.iterations_without_progress = config().max_no_progress;
        assert_eq!(decide(&state, &config()), Action::CourseCorrect);
    }

    #[test]
    fn ready_task_is_executed() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        state.gates_passed.insert("plan".to_string());
        let task = Task::new("T1", "d", "v", "a", TaskSource::Plan);
        state.tasks.insert(task.task_id.clone(), task);
        assert_eq!(
            decide(&state, &config()),
            Action::Execute {
                task_id: "T1".to_string()
            }
        );
    }

    #[test]
    fn exit_gate_fires_when_all_verifications_pass_and_no_pending_tasks() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        state.gates_passed.insert("plan".to_string());
        let mut v = crate::state::Verification::new("core", "a", "core/a.sh");
        v.record_pass();
        state.verifications.insert(v.verification_id.clone(), v);
        let mut t = Task::new("T1", "d", "v", "a", TaskSource::Plan);
        t.status = TaskStatus::Done;
        state.tasks.insert(t.task_id.clone(), t);
        assert_eq!(
            decide(&state, &config()),
            Action::ExitGate {
                warn_no_verifications: false
            }
        );
    }

    #[test]
    fn pick_next_task_prefers_exit_gate_provenance_then_id() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let a = Task::new("B", "d", "v", "a", TaskSource::Plan);
        let b = Task::new("A", "d", "v", "a", TaskSource::ExitGate);
        state.tasks.insert(a.task_id.clone(), a);
        state.tasks.insert(b.task_id.clone(), b);
        assert_eq!(pick_next_task(&state), Some("A".to_string()));
    }
}
