//! LoopState — the single aggregate exclusively owned and mutated by the
//! Loop Driver through bounded handlers and the Tool Dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::coherence::CoherenceReport;
use super::epic::Epic;
use super::git::GitState;
use super::pause::PauseState;
use super::process_monitor::ProcessMonitorState;
use super::refinement::RefinementState;
use super::sprint_context::SprintContext;
use super::task::Task;
use super::verification::Verification;
use super::vrc::VrcSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    PreLoop,
    ValueLoop,
}

/// One line of the append-only progress log, written after every iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub iteration: u32,
    pub made_progress: bool,
    pub summary: String,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
}

/// A single research brief appended by `report_research`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub topic: String,
    pub findings: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCounters {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenCounters {
    pub fn record(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
        self.total += input + output;
    }
}

/// Per-sprint caps on mid-loop task mutation, read from config at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCaps {
    pub max_mid_loop_tasks: u32,
    pub max_description_chars: u32,
    pub max_expected_files: u32,
    pub duplicate_similarity_threshold: f64,
}

impl Default for TaskCaps {
    fn default() -> Self {
        Self {
            max_mid_loop_tasks: 15,
            max_description_chars: 600,
            max_expected_files: 5,
            duplicate_similarity_threshold: 0.75,
        }
    }
}

/// The last structured report received per tool kind, keyed by tool name.
pub type AgentResults = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub sprint_id: String,
    pub phase: LoopPhase,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub gates_passed: BTreeSet<String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub verifications: BTreeMap<String, Verification>,
    #[serde(default)]
    pub verification_category_order: Vec<String>,
    #[serde(default)]
    pub regression_baseline: BTreeSet<String>,
    #[serde(default)]
    pub vrc_history: Vec<VrcSnapshot>,
    #[serde(default)]
    pub progress_log: Vec<ProgressEntry>,
    #[serde(default)]
    pub iterations_without_progress: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseState>,
    pub process_monitor: ProcessMonitorState,
    pub git: GitState,
    #[serde(default)]
    pub context: Option<SprintContext>,
    #[serde(default)]
    pub epics: Vec<Epic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_epic_index: Option<usize>,
    #[serde(default)]
    pub coherence_history: Vec<CoherenceReport>,
    #[serde(default)]
    pub refinements: BTreeMap<String, RefinementState>,
    #[serde(default)]
    pub research_briefs: Vec<ResearchBrief>,
    #[serde(default)]
    pub research_attempted_for_current_failures: bool,
    #[serde(default)]
    pub agent_results: AgentResults,
    #[serde(default)]
    pub exit_gate_attempts: u32,
    pub task_caps: TaskCaps,
    #[serde(default)]
    pub tokens: TokenCounters,
}

impl LoopState {
    pub fn new(sprint_id: impl Into<String>, branch: impl Into<String>, original_branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let original_branch = original_branch.into();
        Self {
            sprint_id: sprint_id.into(),
            phase: LoopPhase::PreLoop,
            iteration: 0,
            gates_passed: BTreeSet::new(),
            tasks: BTreeMap::new(),
            verifications: BTreeMap::new(),
            verification_category_order: Vec::new(),
            regression_baseline: BTreeSet::new(),
            vrc_history: Vec::new(),
            progress_log: Vec::new(),
            iterations_without_progress: 0,
            pause: None,
            process_monitor: ProcessMonitorState::default(),
            git: GitState::new(branch, original_branch),
            context: None,
            epics: Vec::new(),
            current_epic_index: None,
            coherence_history: Vec::new(),
            refinements: BTreeMap::new(),
            research_briefs: Vec::new(),
            research_attempted_for_current_failures: false,
            agent_results: BTreeMap::new(),
            exit_gate_attempts: 0,
            task_caps: TaskCaps::default(),
            tokens: TokenCounters::default(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_some()
    }

    pub fn current_epic(&self) -> Option<&Epic> {
        self.current_epic_index.and_then(|i| self.epics.get(i))
    }

    /// Count of non-done, non-descoped tasks whose source is not Plan — the
    /// figure the mid-loop task-creation cap is checked against.
    pub fn mid_loop_task_count(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| {
                t.source.is_mid_loop()
                    && !matches!(
                        t.status,
                        super::task::TaskStatus::Done | super::task::TaskStatus::Descoped
                    )
            })
            .count() as u32
    }

    pub fn record_progress(&mut self, made_progress: bool, summary: impl Into<String>, tokens_used: u64) {
        self.progress_log.push(ProgressEntry {
            iteration: self.iteration,
            made_progress,
            summary: summary.into(),
            tokens_used,
            timestamp: Utc::now(),
        });
        if made_progress {
            self.iterations_without_progress = 0;
        } else {
            self.iterations_without_progress += 1;
        }
    }

    /// Apply a rollback to a known-good checkpoint: tasks completed after the
    /// checkpoint revert to pending, verifications outside the checkpoint's
    /// passing set revert to pending, and the regression baseline is replaced.
    pub fn apply_rollback_to_checkpoint(&mut self, checkpoint: &super::git::GitCheckpoint, reason: &str) {
        for (id, task) in self.tasks.iter_mut() {
            if !checkpoint.tasks_completed.contains(id)
                && matches!(task.status, super::task::TaskStatus::Done)
            {
                task.reset_to_pending(Some(reason));
            }
        }
        for (id, verification) in self.verifications.iter_mut() {
            if checkpoint.verifications_passing.contains(id) {
                verification.status = super::verification::VerificationStatus::Passed;
            } else {
                verification.status = super::verification::VerificationStatus::Pending;
                verification.failures.clear();
            }
        }
        self.regression_baseline = checkpoint.verifications_passing.clone();
        self.iterations_without_progress = 0;
    }
}
