//! Epic Loop: the multi-epic scoping driver. Runs the value loop once per
//! epic, in dependency order, pausing at each epic boundary for a coherence
//! check and a curated summary before deciding whether to proceed.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::agent_runtime::AgentRuntime;
use crate::config::LoopConfig;
use crate::error::LoopResult;
use crate::state::coherence::CoherenceVerdict;
use crate::state::epic::{DetailLevel, EpicStatus};
use crate::state::LoopState;
use crate::value_loop::{ExitStatus, ValueLoopDriver};

#[derive(Debug, Clone, PartialEq)]
pub enum EpicBoundaryAction {
    Proceed,
    Adjust { reason: String },
    Stop { reason: String },
}

/// The deterministic part of the boundary gate: given the epic's own exit
/// status and the most recent coherence verdict, decide whether to
/// continue to the next epic. A misaligned coherence report always stops
/// the run; a failed epic with no coherence signal yet is escalated for
/// adjustment rather than silently continuing.
pub fn epic_boundary_decision(exit_status: &ExitStatus, last_coherence: Option<CoherenceVerdict>) -> EpicBoundaryAction {
    if let Some(CoherenceVerdict::Misaligned) = last_coherence {
        return EpicBoundaryAction::Stop {
            reason: "coherence check found the epic misaligned with the overall vision".to_string(),
        };
    }
    match exit_status {
        ExitStatus::Success => {
            if let Some(CoherenceVerdict::Drifting) = last_coherence {
                EpicBoundaryAction::Adjust {
                    reason: "epic delivered but coherence check flagged drift".to_string(),
                }
            } else {
                EpicBoundaryAction::Proceed
            }
        }
        ExitStatus::Partial => EpicBoundaryAction::Adjust {
            reason: "epic exited with partial value delivered".to_string(),
        },
        ExitStatus::Failure => EpicBoundaryAction::Stop {
            reason: "epic failed to deliver any verified value".to_string(),
        },
    }
}

pub struct EpicLoopDriver {
    config: LoopConfig,
    runtime: Arc<dyn AgentRuntime>,
    sprint_dir: PathBuf,
}

impl EpicLoopDriver {
    pub fn new(config: LoopConfig, runtime: Arc<dyn AgentRuntime>, sprint_dir: PathBuf) -> Self {
        Self {
            config,
            runtime,
            sprint_dir,
        }
    }

    /// Run every pending/active epic in order until one stops the run or
    /// the list is exhausted. Returns the final state and the exit status
    /// of the last epic run.
    pub async fn run(&self, mut state: LoopState) -> LoopResult<(LoopState, ExitStatus)> {
        let mut last_status = ExitStatus::Success;

        loop {
            let next_index = state
                .epics
                .iter()
                .position(|e| matches!(e.status, EpicStatus::Pending | EpicStatus::Active));
            let Some(index) = next_index else {
                break;
            };

            if state.epics[index].detail_level == DetailLevel::Sketch {
                state.epics[index].promote_to_full();
            }
            state.epics[index].activate();
            state.current_epic_index = Some(index);
            let epic_id = state.epics[index].id.clone();
            info!(epic = %epic_id, "entering epic");

            let mut driver = ValueLoopDriver::new(state, self.config.clone(), self.runtime.clone(), self.sprint_dir.clone());
            let status = driver.run().await?;

            if matches!(status, ExitStatus::Success) {
                driver.record_epic_boundary_checkpoint(&epic_id)?;
            }

            state = driver.state;
            if matches!(status, ExitStatus::Success) {
                state.epics[index].complete();
            }

            let last_coherence = state.coherence_history.last().map(|r| r.verdict);
            let action = epic_boundary_decision(&status, last_coherence);
            last_status = status;

            match action {
                EpicBoundaryAction::Proceed => continue,
                EpicBoundaryAction::Adjust { reason } => {
                    info!(epic = %state.epics[index].id, reason, "epic boundary requests adjustment, continuing");
                    continue;
                }
                EpicBoundaryAction::Stop { reason } => {
                    info!(epic = %state.epics[index].id, reason, "epic boundary stops the run");
                    break;
                }
            }
        }

        Ok((state, last_status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misaligned_coherence_always_stops() {
        let action = epic_boundary_decision(&ExitStatus::Success, Some(CoherenceVerdict::Misaligned));
        assert!(matches!(action, EpicBoundaryAction::Stop { .. }));
    }

    #[test]
    fn clean_success_with_no_drift_proceeds() {
        let action = epic_boundary_decision(&ExitStatus::Success, Some(CoherenceVerdict::Aligned));
        assert_eq!(action, EpicBoundaryAction::Proceed);
    }

    #[test]
    fn failure_stops_even_without_coherence_report() {
        let action = epic_boundary_decision(&ExitStatus::Failure, None);
        assert!(matches!(action, EpicBoundaryAction::Stop { .. }));
    }

    #[test]
    fn partial_success_requests_adjustment() {
        let action = epic_boundary_decision(&ExitStatus::Partial, None);
        assert!(matches!(action, EpicBoundaryAction::Adjust { .. }));
    }
}
