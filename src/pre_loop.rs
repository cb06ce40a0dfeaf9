//! Pre-Loop Driver: the nine-step gate sequence that establishes context and
//! a validated plan before the value loop starts. Each gate's completion is
//! persisted individually into `gates_passed` so a restart can resume.

use std::path::Path;

use tracing::info;

use crate::config::LoopConfig;
use crate::error::{LoopError, LoopResult};
use crate::state::refinement::RefinementState;
use crate::state::{LoopState, TaskStatus};

/// Outcome of a single refinement round, as reported by the reasoning
/// role's tool call. The actual conversation happens over an
/// `AgentRuntime` session; this is just the recorded result.
#[derive(Debug, Clone)]
pub enum RefinementOutcome {
    Consensus { reason: String },
    AwaitingInput { question: String },
}

/// Fixed order of the pre-loop quality gates (§4.12 step 7).
pub const QUALITY_GATES: &[&str] = &[
    "craap",
    "clarity",
    "validate",
    "connect",
    "break",
    "prune",
    "tidy",
    "blocker_validation",
    "initial_vrc",
    "preflight",
];

const MAX_REMEDIATION_ATTEMPTS: u32 = 3;

#[derive(Debug, PartialEq)]
pub enum PreLoopOutcome {
    Ready,
    Aborted { reason: String },
}

pub struct PreLoopDriver<'a> {
    state: &'a mut LoopState,
    config: &'a LoopConfig,
}

impl<'a> PreLoopDriver<'a> {
    pub fn new(state: &'a mut LoopState, config: &'a LoopConfig) -> Self {
        Self { state, config }
    }

    /// Step 1: VISION and PRD files exist and are non-empty. Soft-warns
    /// below 100 bytes rather than failing.
    pub fn validate_inputs(&mut self, vision_path: &Path, prd_path: &Path) -> LoopResult<()> {
        for (name, path) in [("VISION", vision_path), ("PRD", prd_path)] {
            let content = std::fs::read_to_string(path).map_err(|e| LoopError::Config {
                message: format!("failed to read {name} at {}: {e}", path.display()),
            })?;
            if content.trim().is_empty() {
                return Err(LoopError::Config {
                    message: format!("{name} at {} is empty", path.display()),
                });
            }
            if content.len() < 100 {
                tracing::warn!(file = %path.display(), bytes = content.len(), "input file is suspiciously short");
            }
        }
        self.state.gates_passed.insert("validate_inputs".to_string());
        Ok(())
    }

    /// Step 2/5: drive a refinement round to conclusion, checking only
    /// deterministic pre-conditions (hard issues block acknowledgement).
    /// The actual model conversation happens through the caller's
    /// AgentRuntime session; this records the outcome.
    pub fn apply_refinement_outcome(&mut self, target: &str, outcome: RefinementOutcome) -> LoopResult<()> {
        let refinement = self
            .state
            .refinements
            .entry(target.to_string())
            .or_insert_with(|| RefinementState::new(target));
        match outcome {
            RefinementOutcome::Consensus { reason } => refinement.reach_consensus(reason),
            RefinementOutcome::AwaitingInput { question } => refinement.ask(question),
        }
        Ok(())
    }

    /// Step 3: classify single_run vs multi_epic from the number of epics
    /// the decomposer reports (0 or 1 epic means single_run).
    pub fn classify_complexity(epic_count: usize) -> &'static str {
        if epic_count >= 2 {
            "multi_epic"
        } else {
            "single_run"
        }
    }

    /// Step 6: abort if the plan-generation role produced zero tasks.
    pub fn check_plan_generation(&mut self) -> LoopResult<()> {
        if self.state.tasks.is_empty() {
            return Err(LoopError::Config {
                message: "plan generation produced zero tasks".to_string(),
            });
        }
        self.state.gates_passed.insert("plan".to_string());
        Ok(())
    }

    /// Step 7: run the fixed-order quality gates. Each gate is a closure
    /// returning Ok(true) on pass; failures get up to three remediation
    /// attempts via `remediate` before the gate is considered failed.
    pub fn run_quality_gates<F, R>(&mut self, mut check: F, mut remediate: R) -> LoopResult<bool>
    where
        F: FnMut(&LoopState, &str) -> bool,
        R: FnMut(&mut LoopState, &str, u32),
    {
        for gate in QUALITY_GATES {
            let mut attempt = 0;
            loop {
                if check(self.state, gate) {
                    self.state.gates_passed.insert((*gate).to_string());
                    break;
                }
                attempt += 1;
                if attempt > MAX_REMEDIATION_ATTEMPTS {
                    return Ok(false);
                }
                remediate(self.state, gate, attempt);
            }
        }
        Ok(true)
    }

    /// Step 8: any task blocked for a reason other than a human-action
    /// request fails pre-loop outright.
    pub fn check_blockers(&self) -> PreLoopOutcome {
        for task in self.state.tasks.values() {
            if task.status == TaskStatus::Blocked {
                let is_human_action = task
                    .completion_notes
                    .as_deref()
                    .is_some_and(|n| n.starts_with("HUMAN_ACTION:"));
                if !is_human_action {
                    return PreLoopOutcome::Aborted {
                        reason: format!(
                            "task {} blocked without a human-action request: {}",
                            task.task_id,
                            task.completion_notes.as_deref().unwrap_or("no reason recorded")
                        ),
                    };
                }
            }
        }
        PreLoopOutcome::Ready
    }

    /// Step 9: transition phase once every gate has passed.
    pub fn complete(&mut self) {
        self.state.phase = crate::state::loop_state::LoopPhase::ValueLoop;
        info!(sprint_id = %self.state.sprint_id, "pre-loop complete, transitioning to value loop");
    }

    pub fn all_gates_passed(&self) -> bool {
        let required: std::collections::BTreeSet<String> = ["validate_inputs", "plan"]
            .into_iter()
            .map(String::from)
            .chain(QUALITY_GATES.iter().map(|g| g.to_string()))
            .collect();
        required.is_subset(&self.state.gates_passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_complexity_picks_multi_epic_at_two_or_more() {
        assert_eq!(PreLoopDriver::classify_complexity(0), "single_run");
        assert_eq!(PreLoopDriver::classify_complexity(1), "single_run");
        assert_eq!(PreLoopDriver::classify_complexity(2), "multi_epic");
    }

    #[test]
    fn check_plan_generation_aborts_on_empty_plan() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let config = LoopConfig::default();
        let mut driver = PreLoopDriver::new(&mut state, &config);
        assert!(driver.check_plan_generation().is_err());
    }

    #[test]
    fn check_blockers_fails_on_non_human_action_block() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let mut task = crate::state::Task::new("T1", "d", "v", "a", crate::state::TaskSource::Plan);
        task.status = TaskStatus::Blocked;
        task.completion_notes = Some("stuck for unrelated reasons".to_string());
        state.tasks.insert(task.task_id.clone(), task);
        let config = LoopConfig::default();
        let driver = PreLoopDriver::new(&mut state, &config);
        assert!(matches!(driver.check_blockers(), PreLoopOutcome::Aborted { .. }));
    }

    #[test]
    fn run_quality_gates_remediates_up_to_cap_then_fails() {
        let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let config = LoopConfig::default();
        let mut driver = PreLoopDriver::new(&mut state, &config);
        let result = driver
            .run_quality_gates(|_, _| false, |_, _, _| {})
            .unwrap();
        assert!(!result);
    }
}
