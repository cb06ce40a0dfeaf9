//! Task entity — the unit of work the value loop executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle status of a task.
///
/// Transitions are monotonic (`pending` → `in_progress` → `done`) except on
/// rollback, which can move a `done` task back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
    Descoped,
}

impl TaskStatus {
    /// Whether a task in this status satisfies a dependent's readiness check.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Done | Self::Descoped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Descoped => "descoped",
        };
        write!(f, "{s}")
    }
}

/// Where a task came from — drives ordering and the mid-loop task cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Plan,
    Gate,
    Eval,
    CourseCorrection,
    Vrc,
    ExitGate,
    CriticalEval,
}

impl TaskSource {
    /// Provenance priority used to order ready tasks for EXECUTE: lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::ExitGate => 0,
            Self::CriticalEval => 1,
            Self::Vrc => 2,
            Self::CourseCorrection => 3,
            Self::Plan => 4,
            Self::Gate | Self::Eval => 5,
        }
    }

    /// Tasks whose source is not `Plan` count against the mid-loop creation cap.
    pub fn is_mid_loop(&self) -> bool {
        !matches!(self, Self::Plan)
    }
}

/// A single task in the delivery plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub description: String,
    pub value: String,
    pub acceptance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_section: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub expected_files: Vec<String>,
    pub status: TaskStatus,
    pub source: TaskSource,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_notes: Option<String>,
    #[serde(default)]
    pub health_checked: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        value: impl Into<String>,
        acceptance: impl Into<String>,
        source: TaskSource,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            value: value.into(),
            acceptance: acceptance.into(),
            prd_section: None,
            dependencies: BTreeSet::new(),
            phase: None,
            epic_id: None,
            expected_files: Vec::new(),
            status: TaskStatus::Pending,
            source,
            retry_count: 0,
            files_created: Vec::new(),
            files_modified: Vec::new(),
            completion_notes: None,
            health_checked: false,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_epic(mut self, epic_id: impl Into<String>) -> Self {
        self.epic_id = Some(epic_id.into());
        self
    }

    pub fn with_expected_files(mut self, files: impl IntoIterator<Item = String>) -> Self {
        self.expected_files = files.into_iter().collect();
        self
    }

    /// True if this task's `epic_id` is empty or matches the given current epic.
    pub fn in_epic_scope(&self, current_epic: Option<&str>) -> bool {
        match (&self.epic_id, current_epic) {
            (None, _) => true,
            (Some(id), Some(current)) => id == current,
            (Some(_), None) => true,
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = TaskStatus::InProgress;
        self.updated_at = Some(Utc::now());
    }

    pub fn mark_done(
        &mut self,
        files_created: Vec<String>,
        files_modified: Vec<String>,
        notes: Option<String>,
    ) {
        self.status = TaskStatus::Done;
        self.files_created = files_created;
        self.files_modified = files_modified;
        self.completion_notes = notes;
        self.updated_at = Some(Utc::now());
    }

    /// Revert to `pending` for a crash-recovery or rollback reset. Retry count
    /// is preserved per the rollback-then-redo idempotence law.
    pub fn reset_to_pending(&mut self, reason: Option<&str>) {
        self.status = TaskStatus::Pending;
        self.files_created.clear();
        self.files_modified.clear();
        if let Some(reason) = reason {
            self.completion_notes = Some(match &self.completion_notes {
                Some(existing) => format!("{existing}\n[rollback: {reason}]"),
                None => format!("[rollback: {reason}]"),
            });
        }
        self.updated_at = Some(Utc::now());
    }

    pub fn block_for_human(&mut self, action: &str) {
        self.status = TaskStatus::Blocked;
        self.completion_notes = Some(format!("HUMAN_ACTION: {action}"));
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descoped_and_done_satisfy_dependency() {
        assert!(TaskStatus::Done.satisfies_dependency());
        assert!(TaskStatus::Descoped.satisfies_dependency());
        assert!(!TaskStatus::Pending.satisfies_dependency());
        assert!(!TaskStatus::Blocked.satisfies_dependency());
    }

    #[test]
    fn provenance_priority_orders_exit_gate_first() {
        assert!(TaskSource::ExitGate.priority() < TaskSource::CriticalEval.priority());
        assert!(TaskSource::CriticalEval.priority() < TaskSource::Vrc.priority());
        assert!(TaskSource::Vrc.priority() < TaskSource::CourseCorrection.priority());
        assert!(TaskSource::CourseCorrection.priority() < TaskSource::Plan.priority());
    }

    #[test]
    fn plan_tasks_are_not_mid_loop() {
        assert!(!TaskSource::Plan.is_mid_loop());
        assert!(TaskSource::Eval.is_mid_loop());
    }

    #[test]
    fn reset_to_pending_preserves_retry_count() {
        let mut t = Task::new("T1", "desc", "value", "accept", TaskSource::Plan);
        t.retry_count = 3;
        t.mark_done(vec!["a.rs".into()], vec![], None);
        t.reset_to_pending(Some("test rollback"));
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 3);
        assert!(t.files_created.is_empty());
        assert!(t.completion_notes.unwrap().contains("test rollback"));
    }

    #[test]
    fn in_epic_scope_is_true_for_empty_epic() {
        let t = Task::new("T1", "desc", "value", "accept", TaskSource::Plan);
        assert!(t.in_epic_scope(Some("epic-1")));
        assert!(t.in_epic_scope(None));
    }
}
