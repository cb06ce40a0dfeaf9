//! Value Loop Driver: the single-threaded cooperative loop that dispatches
//! decisions to handlers, runs heartbeats, and persists state every
//! iteration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::agent_runtime::{self, AgentRuntime, Role};
use crate::config::LoopConfig;
use crate::decision_engine::{self, Action};
use crate::error::{LoopError, LoopResult};
use crate::git_safety::GitSafety;
use crate::process_monitor;
use crate::state::store::{RollbackWal, WalStatus};
use crate::state::vrc::VrcSnapshot;
use crate::state::{LoopState, StateStore, TaskStatus, VerificationStatus};
use crate::subprocess::{CommandSpec, SubprocessRunner};
use crate::tool_dispatcher::ToolDispatcher;
use crate::verification_engine;

pub enum ExitStatus {
    Success,
    Partial,
    Failure,
}

impl ExitStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 2,
            Self::Failure => 1,
        }
    }
}

pub struct ValueLoopDriver {
    pub state: LoopState,
    config: LoopConfig,
    store: StateStore,
    runtime: Arc<dyn AgentRuntime>,
    git: GitSafety,
    subprocess: SubprocessRunner,
    sprint_dir: PathBuf,
}

impl ValueLoopDriver {
    pub fn new(
        state: LoopState,
        config: LoopConfig,
        runtime: Arc<dyn AgentRuntime>,
        sprint_dir: PathBuf,
    ) -> Self {
        let store = StateStore::new(sprint_dir.clone());
        let git = GitSafety::new(&sprint_dir, state.sprint_id.clone());
        let subprocess = SubprocessRunner::new(config.max_parallel_workers);
        Self {
            state,
            config,
            store,
            runtime,
            git,
            subprocess,
            sprint_dir,
        }
    }

    fn should_continue(&self, iteration: u32) -> bool {
        if self.config.token_budget > 0 && self.state.tokens.total > self.config.token_budget {
            return false;
        }
        iteration < self.config.max_loop_iterations
    }

    pub async fn run(&mut self) -> LoopResult<ExitStatus> {
        for iteration in 0..self.config.max_loop_iterations {
            if !self.should_continue(iteration) {
                info!(iteration, "token budget exhausted, stopping loop");
                break;
            }
            self.state.iteration = iteration;

            let action = decision_engine::decide(&self.state, &self.config);
            self.state
                .progress_log
                .push(crate::state::loop_state::ProgressEntry {
                    iteration,
                    made_progress: false,
                    summary: format!("decided: {action:?}"),
                    tokens_used: 0,
                    timestamp: chrono::Utc::now(),
                });

            if let Action::ExitGate { warn_no_verifications } = action {
                match self.run_exit_gate(warn_no_verifications).await {
                    Ok(true) => {
                        self.persist()?;
                        return Ok(ExitStatus::Success);
                    }
                    Ok(false) => {
                        self.state.exit_gate_attempts += 1;
                        self.state.record_progress(false, "exit gate failed, gaps created", 0);
                    }
                    Err(e) => {
                        warn!(error = %e, "exit gate handler failed");
                        self.reset_in_progress_tasks();
                    }
                }
                self.persist()?;
                continue;
            }

            match self.dispatch_action(&action).await {
                Ok(made_progress) => {
                    self.state.record_progress(made_progress, format!("{action:?}"), 0);
                }
                Err(e) => {
                    warn!(error = %e, action = ?action, "handler failed, resetting in-progress tasks");
                    self.reset_in_progress_tasks();
                    self.state.record_progress(false, format!("{action:?} failed: {e}"), 0);
                }
            }

            if !self.state.is_paused() {
                self.run_heartbeats().await;
            }

            self.persist()?;
        }

        let status = match self.state.vrc_history.last() {
            Some(snapshot) if snapshot.value_score > 0.5 => ExitStatus::Partial,
            _ => ExitStatus::Failure,
        };
        Ok(status)
    }

    fn reset_in_progress_tasks(&mut self) {
        for task in self.state.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                task.reset_to_pending(Some("handler failure"));
            }
        }
    }

    async fn dispatch_action(&mut self, action: &Action) -> LoopResult<bool> {
        match action {
            Action::Execute { task_id } => {
                let task_id = task_id.clone();
                if let Some(task) = self.state.tasks.get_mut(&task_id) {
                    task.mark_in_progress();
                }
                let Some(task) = self.state.tasks.get(&task_id).cloned() else {
                    return Ok(false);
                };
                let system = "You are the Builder. Implement the task fully against the working tree, \
                    then call report_task_complete with the files you created or modified.";
                let user = format!(
                    "Task {}: {}\nValue: {}\nAcceptance: {}",
                    task.task_id, task.description, task.value, task.acceptance
                );
                self.run_role_session(Role::Builder, system, &user).await?;
                let done = self
                    .state
                    .tasks
                    .get(&task_id)
                    .is_some_and(|t| t.status == TaskStatus::Done);
                if done {
                    self.commit_progress(&format!("complete {task_id}"))?;
                    if !self.state.regression_baseline.is_empty() {
                        let regressed = verification_engine::run_regression(
                            &mut self.state,
                            &self.sprint_dir,
                            &self.subprocess,
                            Duration::from_secs(self.config.subprocess_timeout_secs),
                            &task_id,
                        )
                        .await?;
                        if !regressed.is_empty() {
                            warn!(task_id = %task_id, regressed = ?regressed, "task introduced a regression");
                        }
                    }
                }
                Ok(done)
            }
            Action::RunQc => {
                let ran = verification_engine::run_ready_category(
                    &mut self.state,
                    &self.sprint_dir,
                    &self.subprocess,
                    Duration::from_secs(self.config.subprocess_timeout_secs),
                )
                .await?;
                if !ran.is_empty()
                    && !self.state.verifications.is_empty()
                    && self.state.verifications.values().all(|v| v.status == VerificationStatus::Passed)
                {
                    if let Some(hash) = self.commit_progress("qc pass")? {
                        self.push_checkpoint(hash, "qc_pass");
                    }
                }
                Ok(!ran.is_empty())
            }
            Action::Fix { verification_id } => {
                let verification_id = verification_id.clone();
                let Some(verification) = self.state.verifications.get(&verification_id).cloned() else {
                    return Ok(false);
                };
                let failure = verification
                    .failures
                    .last()
                    .map(|f| format!("exit_code={} stdout={} stderr={}", f.exit_code, f.stdout_excerpt, f.stderr_excerpt))
                    .unwrap_or_default();
                let system = "You are the Fixer. Diagnose and repair the failing verification and the \
                    code it checks.";
                let user = format!(
                    "Verification {} (script {}) has failed {} time(s). Latest failure:\n{failure}",
                    verification.verification_id, verification.script_path, verification.attempts
                );
                self.run_role_session(Role::Fixer, system, &user).await?;
                let passed = verification_engine::run_single(
                    &mut self.state,
                    &self.sprint_dir,
                    &self.subprocess,
                    Duration::from_secs(self.config.subprocess_timeout_secs),
                    &verification_id,
                )
                .await?;
                if passed {
                    self.commit_progress(&format!("fix {verification_id}"))?;
                }
                Ok(passed)
            }
            Action::GenerateQc => {
                let scripts = verification_engine::discover(&self.config.verifications_dir())?;
                verification_engine::register_scripts(&mut self.state, &scripts);
                Ok(!scripts.is_empty())
            }
            Action::Research => {
                let failing: Vec<String> = self
                    .state
                    .verifications
                    .values()
                    .filter(|v| v.status == VerificationStatus::Failed)
                    .map(|v| v.verification_id.clone())
                    .collect();
                let briefs_before = self.state.research_briefs.len();
                let system = "You are the Researcher. Investigate why these verifications keep failing \
                    and report findings via report_research.";
                let user = format!("Repeatedly failing verifications: {}", failing.join(", "));
                self.run_role_session(Role::Researcher, system, &user).await?;
                Ok(self.state.research_briefs.len() > briefs_before)
            }
            Action::CriticalEval => {
                let tasks_before = self.state.tasks.len();
                let done = self.state.tasks.values().filter(|t| t.status == TaskStatus::Done).count();
                let passing = self.state.verifications.values().filter(|v| v.status == VerificationStatus::Passed).count();
                let system = "You are the Evaluator performing a critical evaluation of the delivery so far. \
                    Report findings via report_eval_finding; critical or blocking findings auto-create tasks.";
                let user = format!("{done} tasks done, {passing} verifications passing. Critically evaluate the delivery.");
                self.run_role_session(Role::Evaluator, system, &user).await?;
                Ok(self.state.tasks.len() > tasks_before)
            }
            Action::CoherenceEval => {
                let reports_before = self.state.coherence_history.len();
                let system = "You are the Evaluator checking whether delivered work is still coherent \
                    with the original vision. Report via report_coherence.";
                let user = "A prior coherence check flagged misalignment. Re-assess and report the current verdict.";
                self.run_role_session(Role::Evaluator, system, user).await?;
                Ok(self.state.coherence_history.len() > reports_before)
            }
            Action::CourseCorrect => {
                let system = "You are the Reasoner performing a course correction: restructure, descope, \
                    add tasks, regenerate tests, roll back to a checkpoint, or escalate to a human. \
                    Report your decision via report_course_correction.";
                let user = format!(
                    "No progress for {} iteration(s). Decide the correction.",
                    self.state.iterations_without_progress
                );
                self.run_role_session(Role::Reasoner, system, &user).await?;
                let correction = self.state.agent_results.get("report_course_correction").cloned();
                let Some(correction) = correction else { return Ok(false) };
                let kind = correction.get("kind").and_then(|v| v.as_str()).unwrap_or_default();
                if kind == "rollback" {
                    let Some(label) = correction.get("to_label").and_then(|v| v.as_str()) else {
                        return Ok(false);
                    };
                    self.rollback_to_checkpoint(label, "course correction").await?;
                    Ok(true)
                } else {
                    Ok(true)
                }
            }
            Action::ServiceFix => {
                let unhealthy: Vec<String> = self
                    .state
                    .context
                    .as_ref()
                    .map(|c| {
                        c.services
                            .iter()
                            .filter(|(_, status)| status.as_str() != "healthy")
                            .map(|(name, status)| format!("{name}={status}"))
                            .collect()
                    })
                    .unwrap_or_default();
                let system = "You are the Fixer. One or more services this delivery depends on are \
                    unhealthy. Restore them, then call report_discovery with the updated service health.";
                let user = format!("Unhealthy services: {}", unhealthy.join(", "));
                self.run_role_session(Role::Fixer, system, &user).await?;
                let now_healthy = self
                    .state
                    .context
                    .as_ref()
                    .is_some_and(|c| c.services.values().all(|s| s == "healthy"));
                if now_healthy {
                    self.commit_progress("service fix")?;
                }
                Ok(now_healthy)
            }
            Action::InteractivePause => {
                let Some(pause) = self.state.pause.clone() else {
                    return Ok(false);
                };
                let Some(command) = pause.verification_command.clone() else {
                    return Ok(false);
                };
                let spec = CommandSpec::new("sh", &self.sprint_dir)
                    .with_args(["-c".to_string(), command])
                    .with_timeout(Duration::from_secs(self.config.subprocess_timeout_secs));
                let outcome = self.subprocess.run(&spec).await;
                if outcome.exit_code != 0 {
                    return Ok(false);
                }
                if let Some(task_id) = &pause.blocked_task_id {
                    if let Some(task) = self.state.tasks.get_mut(task_id) {
                        task.reset_to_pending(Some("human action completed"));
                    }
                }
                self.state.pause = None;
                Ok(true)
            }
            Action::ExitGate { .. } => unreachable!("handled before dispatch"),
        }
    }

    /// Begin a fresh session for `role`, send one message, and dispatch every
    /// tool call the response carries through the Tool Dispatcher before
    /// returning. Token usage is recorded against the running budget.
    async fn run_role_session(&mut self, role: Role, system: &str, user_message: &str) -> LoopResult<()> {
        let role_config = agent_runtime::default_role_config(role);
        let timeout = Duration::from_secs(self.config.session_timeout_secs);
        let handle = self
            .runtime
            .begin(role, system, &role_config, timeout)
            .await
            .map_err(|e| LoopError::RuntimeError { message: e.to_string() })?;
        let response = self
            .runtime
            .send(handle, user_message)
            .await
            .map_err(|e| LoopError::RuntimeError { message: e.to_string() })?;
        self.state.tokens.record(response.usage.input, response.usage.output);
        for call in &response.tool_calls {
            ToolDispatcher::dispatch(&mut self.state, &self.config, &call.name, call.inputs.clone());
        }
        Ok(())
    }

    /// Stage tracked + safe-dir changes and commit, per the Git Safety
    /// Layer's commit-trigger list. Returns the new commit hash, if anything
    /// was staged.
    fn commit_progress(&mut self, message: &str) -> LoopResult<Option<String>> {
        self.git.stage_selectively(&[])?;
        Ok(self.git.commit(message)?)
    }

    /// Record a checkpoint at a known-good point: current commit, the done
    /// tasks and passing verifications at that point, and the latest VRC
    /// value score.
    fn push_checkpoint(&mut self, commit_hash: String, label: &str) {
        let tasks_completed = self
            .state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.task_id.clone())
            .collect();
        let verifications_passing = self
            .state
            .verifications
            .values()
            .filter(|v| v.status == VerificationStatus::Passed)
            .map(|v| v.verification_id.clone())
            .collect();
        let value_score = self.state.vrc_history.last().map(|v| v.value_score).unwrap_or(0.0);
        self.state.git.checkpoints.push(crate::state::git::GitCheckpoint::new(
            commit_hash,
            label,
            tasks_completed,
            verifications_passing,
            value_score,
        ));
    }

    async fn run_exit_gate(&mut self, warn_no_verifications: bool) -> LoopResult<bool> {
        if warn_no_verifications {
            warn!("exit gate passing with no verifications defined");
        }
        let all_passing = self
            .state
            .verifications
            .values()
            .all(|v| v.status == VerificationStatus::Passed);
        if all_passing {
            if let Some(hash) = self.commit_progress("exit gate pass")? {
                self.push_checkpoint(hash, "exit_gate");
            }
            crate::report::write_artifacts(&self.state, &self.sprint_dir, 0)
                .map_err(|e| LoopError::RuntimeError {
                    message: e.to_string(),
                })?;
        }
        Ok(all_passing)
    }

    async fn run_heartbeats(&mut self) {
        process_monitor::update_churn(&mut self.state);
        process_monitor::update_metrics(&mut self.state, &self.config, 0.0, 0);
        process_monitor::evaluate_trigger(&mut self.state, &self.config, 3, 3);
        if decision_engine::should_invoke_strategy_reasoner(&self.state) {
            info!(iteration = self.state.iteration, "process monitor RED, strategy reasoner due");
        }

        // VRC depth selection (full on early/periodic iterations) is the
        // reasoning role's call when it reports via `report_vrc`; the
        // fallback below only fires when it doesn't, and is always quick.
        if self.state.agent_results.get("report_vrc").is_none() {
            let done = self.state.tasks.values().filter(|t| t.status == TaskStatus::Done).count() as u32;
            let total = self.state.tasks.len() as u32;
            let blocked = self
                .state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Blocked)
                .count() as u32;
            let fallback = VrcSnapshot::fallback(self.state.iteration, done, total, blocked);
            self.state.vrc_history.push(fallback);
        }
    }

    fn persist(&mut self) -> LoopResult<()> {
        self.store.save(&self.state)?;
        Ok(())
    }

    pub fn runtime(&self) -> &Arc<dyn AgentRuntime> {
        &self.runtime
    }

    /// Commit and checkpoint at an epic boundary, per the Git Safety
    /// Layer's "checkpoint at epic boundaries" rule.
    pub fn record_epic_boundary_checkpoint(&mut self, epic_id: &str) -> LoopResult<()> {
        if let Some(hash) = self.commit_progress(&format!("epic boundary: {epic_id}"))? {
            self.push_checkpoint(hash, &format!("epic_{epic_id}"));
        }
        Ok(())
    }

    /// Roll back to the named checkpoint, guarded by a write-ahead log so a
    /// crash mid-rollback can be resumed on the next startup: write the WAL,
    /// reset the working tree, revert LoopState, commit a rollback marker,
    /// persist, then clear the WAL. Any step failing before the WAL is
    /// cleared leaves enough on disk for `recover_from_crash` to finish it.
    pub async fn rollback_to_checkpoint(&mut self, label: &str, reason: &str) -> LoopResult<()> {
        if self.state.git.rollbacks_remaining() == 0 {
            return Err(LoopError::Git(
                crate::error::GitError::RollbackBudgetExhausted {
                    max: self.state.git.max_rollbacks,
                },
            ));
        }
        let checkpoint = self
            .state
            .git
            .checkpoint_by_label(label)
            .cloned()
            .ok_or_else(|| LoopError::Git(crate::error::GitError::CheckpointNotFound { label: label.to_string() }))?;
        let from_hash = self.git.current_commit()?;

        self.store.write_wal(&RollbackWal {
            status: WalStatus::Started,
            from_hash: from_hash.clone(),
            to_hash: checkpoint.commit_hash.clone(),
            label: label.to_string(),
            reason: reason.to_string(),
            iteration: self.state.iteration,
        })?;

        self.git.rollback_reset(&checkpoint.commit_hash)?;
        self.state.apply_rollback_to_checkpoint(&checkpoint, reason);
        let new_commit_hash = self
            .git
            .commit(&format!("rollback to {label}: {reason}"))?
            .unwrap_or_else(|| checkpoint.commit_hash.clone());
        self.state.git.rollbacks.push(crate::state::git::RollbackRecord {
            from_hash,
            to_hash: checkpoint.commit_hash.clone(),
            label: label.to_string(),
            reason: reason.to_string(),
            iteration: self.state.iteration,
            new_commit_hash: new_commit_hash.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.push_checkpoint(new_commit_hash, &format!("rollback_{label}"));

        self.persist()?;
        self.store.clear_wal()?;
        Ok(())
    }

    /// Startup recovery: if a rollback WAL was left behind by a crash
    /// mid-rollback, the reset/clean already happened or didn't — either
    /// way the safe move is to replay it against the WAL's target hash
    /// before deleting the marker.
    pub fn recover_from_crash(&mut self) -> LoopResult<()> {
        if let Some(wal) = self.store.read_wal()? {
            if wal.status == WalStatus::Started {
                warn!(label = %wal.label, to = %wal.to_hash, "resuming interrupted rollback from WAL");
                self.git.rollback_reset(&wal.to_hash)?;
            }
            self.store.clear_wal()?;
        }
        self.reset_in_progress_tasks();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runtime::{RuntimeResponse, ScriptedAgentRuntime, SessionHandle, StopReason, ToolCall, Usage};
    use crate::state::{Task, TaskSource};
    use serde_json::json;

    fn driver() -> ValueLoopDriver {
        let dir = tempfile::tempdir().unwrap();
        let state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let config = LoopConfig {
            sprint_dir: dir.path().to_path_buf(),
            max_loop_iterations: 5,
            ..LoopConfig::default()
        };
        let runtime = Arc::new(ScriptedAgentRuntime::new());
        let mut driver = ValueLoopDriver::new(state, config, runtime, dir.path().to_path_buf());
        std::mem::forget(dir);
        driver
    }

    fn init_git_repo(path: &std::path::Path) {
        let git = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(path)
                .output()
                .unwrap();
        };
        git(&["init"]);
        git(&["config", "user.email", "test@test.com"]);
        git(&["config", "user.name", "Test User"]);
        std::fs::write(path.join("README.md"), "# test\n").unwrap();
        git(&["add", "."]);
        git(&["commit", "-m", "initial"]);
    }

    /// A driver backed by a real git repo, plus its scripted runtime handle
    /// (kept concrete so tests can queue responses) and its working
    /// directory (the tempdir is leaked for the test's lifetime, matching
    /// `driver()` above).
    fn driver_with_git() -> (ValueLoopDriver, PathBuf, Arc<ScriptedAgentRuntime>) {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        let path = dir.path().to_path_buf();
        let state = LoopState::new("sprint-a", "sprint-a-1", "main");
        let config = LoopConfig {
            sprint_dir: path.clone(),
            max_loop_iterations: 5,
            ..LoopConfig::default()
        };
        let scripted = Arc::new(ScriptedAgentRuntime::new());
        let runtime: Arc<dyn AgentRuntime> = scripted.clone();
        let driver = ValueLoopDriver::new(state, config, runtime, path.clone());
        std::mem::forget(dir);
        (driver, path, scripted)
    }

    fn write_tracked_change(path: &std::path::Path, name: &str) {
        std::fs::create_dir_all(path.join("src")).unwrap();
        std::fs::write(path.join("src").join(name), "fn touched() {}\n").unwrap();
    }

    fn one_shot(tool_calls: Vec<ToolCall>) -> RuntimeResponse {
        RuntimeResponse {
            final_text: "done".to_string(),
            tool_calls,
            usage: Usage { input: 10, output: 20 },
            stop_reason: StopReason::EndTurn,
        }
    }

    #[tokio::test]
    async fn run_stops_at_max_iterations_without_tasks() {
        let mut driver = driver();
        let status = driver.run().await.unwrap();
        assert!(matches!(status, ExitStatus::Failure));
        assert!(driver.state.iteration < driver_config_max(&driver));
    }

    fn driver_config_max(_driver: &ValueLoopDriver) -> u32 {
        5
    }

    #[tokio::test]
    async fn failed_handler_resets_in_progress_tasks_to_pending() {
        let mut driver = driver();
        let mut task = Task::new("T1", "d", "v", "a", TaskSource::Plan);
        task.mark_in_progress();
        driver.state.tasks.insert(task.task_id.clone(), task);
        driver.reset_in_progress_tasks();
        assert_eq!(driver.state.tasks["T1"].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn execute_action_completes_task_and_commits() {
        let (mut driver, path, runtime) = driver_with_git();
        let task = Task::new("T1", "d", "v", "a", TaskSource::Plan);
        driver.state.tasks.insert(task.task_id.clone(), task);
        write_tracked_change(&path, "feature.rs");

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_task_complete".to_string(),
                inputs: json!({"task_id": "T1", "files_created": ["src/feature.rs"]}),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::Execute { task_id: "T1".to_string() }).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.tasks["T1"].status, TaskStatus::Done);
        assert_eq!(driver.state.tokens.total, 30);
    }

    #[tokio::test]
    async fn run_qc_commits_and_checkpoints_when_all_verifications_pass() {
        let (mut driver, path, _runtime) = driver_with_git();
        driver.state.verification_category_order.push("core".to_string());
        let verification = crate::state::Verification::new("core", "smoke", "true");
        driver.state.verifications.insert(verification.verification_id.clone(), verification);
        write_tracked_change(&path, "qc.rs");

        let made_progress = driver.dispatch_action(&Action::RunQc).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.verifications["core/smoke"].status, VerificationStatus::Passed);
        assert_eq!(driver.state.git.checkpoints.last().unwrap().label, "qc_pass");
    }

    #[tokio::test]
    async fn fix_action_reruns_verification_and_commits_on_pass() {
        let (mut driver, path, runtime) = driver_with_git();
        let mut verification = crate::state::Verification::new("core", "broken", "true");
        verification.record_fail(1, "", "boom");
        driver.state.verifications.insert(verification.verification_id.clone(), verification);
        write_tracked_change(&path, "fix.rs");

        runtime.script(SessionHandle(1), vec![one_shot(vec![])]);

        let made_progress = driver
            .dispatch_action(&Action::Fix { verification_id: "core/broken".to_string() })
            .await
            .unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.verifications["core/broken"].status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn research_action_records_new_brief() {
        let (mut driver, _path, runtime) = driver_with_git();
        let mut verification = crate::state::Verification::new("core", "flaky", "true");
        verification.record_fail(1, "", "boom");
        driver.state.verifications.insert(verification.verification_id.clone(), verification);

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_research".to_string(),
                inputs: json!({"topic": "flaky core test", "findings": "race condition in fixture setup"}),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::Research).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.research_briefs.len(), 1);
    }

    #[tokio::test]
    async fn critical_eval_action_auto_creates_task_for_blocking_finding() {
        let (mut driver, _path, runtime) = driver_with_git();

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_eval_finding".to_string(),
                inputs: json!({"severity": "blocking", "description": "auth flow is untested"}),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::CriticalEval).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.tasks.len(), 1);
    }

    #[tokio::test]
    async fn coherence_eval_action_records_new_report() {
        let (mut driver, _path, runtime) = driver_with_git();

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_coherence".to_string(),
                inputs: json!({"verdict": "DRIFTING", "summary": "scope crept into unrelated services"}),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::CoherenceEval).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.coherence_history.len(), 1);
    }

    #[tokio::test]
    async fn course_correct_rollback_restores_prior_checkpoint() {
        let (mut driver, _path, runtime) = driver_with_git();

        let mut kept = Task::new("T1", "d", "v", "a", TaskSource::Plan);
        kept.mark_done(vec![], vec![], None);
        driver.state.tasks.insert(kept.task_id.clone(), kept);
        let hash = driver.git.current_commit().unwrap();
        driver.push_checkpoint(hash, "good_point");

        let mut regressed = Task::new("T2", "d", "v", "a", TaskSource::Plan);
        regressed.mark_done(vec![], vec![], None);
        driver.state.tasks.insert(regressed.task_id.clone(), regressed);

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_course_correction".to_string(),
                inputs: json!({"kind": "rollback", "reason": "T2 regressed", "to_label": "good_point"}),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::CourseCorrect).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.tasks["T1"].status, TaskStatus::Done);
        assert_eq!(driver.state.tasks["T2"].status, TaskStatus::Pending);
        assert_eq!(driver.state.git.rollbacks.len(), 1);
    }

    #[tokio::test]
    async fn course_correct_non_rollback_kind_leaves_checkpoints_untouched() {
        let (mut driver, _path, runtime) = driver_with_git();

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_course_correction".to_string(),
                inputs: json!({"kind": "descope", "reason": "feature out of budget"}),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::CourseCorrect).await.unwrap();
        assert!(made_progress);
        assert!(driver.state.git.checkpoints.is_empty());
    }

    #[tokio::test]
    async fn service_fix_action_commits_once_services_are_healthy() {
        let (mut driver, path, runtime) = driver_with_git();
        let mut context = crate::state::SprintContext::new("web_app", "greenfield");
        context.services.insert("redis".to_string(), "down".to_string());
        driver.state.context = Some(context);
        write_tracked_change(&path, "servicefix.rs");

        runtime.script(
            SessionHandle(1),
            vec![one_shot(vec![ToolCall {
                name: "report_discovery".to_string(),
                inputs: json!({
                    "deliverable_type": "web_app",
                    "project_type": "greenfield",
                    "services": {"redis": "healthy"},
                }),
            }])],
        );

        let made_progress = driver.dispatch_action(&Action::ServiceFix).await.unwrap();
        assert!(made_progress);
        assert_eq!(driver.state.context.as_ref().unwrap().services["redis"], "healthy");
    }

    #[tokio::test]
    async fn interactive_pause_resolves_once_verification_command_passes() {
        let (mut driver, _path, _runtime) = driver_with_git();
        let mut task = Task::new("T5", "d", "v", "a", TaskSource::Plan);
        task.block_for_human("provide API key");
        driver.state.tasks.insert(task.task_id.clone(), task);
        driver.state.pause = Some(
            crate::state::PauseState::new("provide API key", "set STRIPE_KEY in .env.local")
                .with_blocked_task_id("T5")
                .with_verification_command("true"),
        );

        let made_progress = driver.dispatch_action(&Action::InteractivePause).await.unwrap();
        assert!(made_progress);
        assert!(driver.state.pause.is_none());
        assert_eq!(driver.state.tasks["T5"].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn interactive_pause_stays_blocked_while_verification_command_fails() {
        let (mut driver, _path, _runtime) = driver_with_git();
        let mut task = Task::new("T5", "d", "v", "a", TaskSource::Plan);
        task.block_for_human("provide API key");
        driver.state.tasks.insert(task.task_id.clone(), task);
        driver.state.pause = Some(
            crate::state::PauseState::new("provide API key", "set STRIPE_KEY in .env.local")
                .with_blocked_task_id("T5")
                .with_verification_command("false"),
        );

        let made_progress = driver.dispatch_action(&Action::InteractivePause).await.unwrap();
        assert!(!made_progress);
        assert!(driver.state.pause.is_some());
        assert_eq!(driver.state.tasks["T5"].status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn epic_boundary_checkpoint_records_when_something_staged() {
        let (mut driver, path, _runtime) = driver_with_git();
        write_tracked_change(&path, "epic.rs");

        driver.record_epic_boundary_checkpoint("epic-1").unwrap();
        assert_eq!(driver.state.git.checkpoints.last().unwrap().label, "epic_epic-1");
    }
}
