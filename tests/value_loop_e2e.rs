//! End-to-end tests driving the public `ValueLoopDriver`/`EpicLoopDriver`
//! surface through a real (tempdir) git repo, the way a sprint actually
//! runs: scripted agent responses in, persisted state and git history out.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use serde_json::json;

use value_loop::agent_runtime::{
    AgentRuntime, RuntimeResponse, ScriptedAgentRuntime, SessionHandle, StopReason, ToolCall, Usage,
};
use value_loop::decision_engine::{self, Action};
use value_loop::guardrails::{self, TaskMutation};
use value_loop::state::{
    GitCheckpoint, LoopState, PauseState, Task, TaskSource, TaskStatus, Verification, VerificationStatus,
};
use value_loop::value_loop::ExitStatus;
use value_loop::{LoopConfig, ValueLoopDriver};

fn init_git_repo(path: &Path) {
    let git = |args: &[&str]| {
        Command::new("git").args(args).current_dir(path).output().expect("git command failed");
    };
    git(&["init"]);
    git(&["config", "user.email", "test@test.com"]);
    git(&["config", "user.name", "Test User"]);
    std::fs::write(path.join("README.md"), "# sprint\n").unwrap();
    git(&["add", "."]);
    git(&["commit", "-m", "initial"]);
}

fn config_for(sprint_dir: &Path) -> LoopConfig {
    LoopConfig {
        sprint_dir: sprint_dir.to_path_buf(),
        max_loop_iterations: 20,
        ..LoopConfig::default()
    }
}

fn one_shot(tool_calls: Vec<ToolCall>) -> RuntimeResponse {
    RuntimeResponse {
        final_text: "done".to_string(),
        tool_calls,
        usage: Usage { input: 5, output: 5 },
        stop_reason: StopReason::EndTurn,
    }
}

/// Scenario E1: a single task, once implemented, flows through
/// GENERATE_QC → RUN_QC → EXIT_GATE to a successful delivery.
#[tokio::test]
async fn happy_path_single_deliverable_exits_success() {
    let dir = tempfile::tempdir().unwrap();
    init_git_repo(dir.path());

    std::fs::create_dir_all(dir.path().join("verifications/core")).unwrap();
    std::fs::write(dir.path().join("verifications/core/adds_two.sh"), "#!/bin/sh\nexit 0\n").unwrap();

    let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
    state.gates_passed.insert("plan".to_string());
    let task = Task::new("T1", "implement adds_two", "user can add two numbers", "adds_two(2,3) == 5", TaskSource::Plan);
    state.tasks.insert(task.task_id.clone(), task);

    let scripted = Arc::new(ScriptedAgentRuntime::new());
    let runtime: Arc<dyn AgentRuntime> = scripted.clone();
    scripted.script(
        SessionHandle(1),
        vec![one_shot(vec![ToolCall {
            name: "report_task_complete".to_string(),
            inputs: json!({"task_id": "T1", "files_created": ["src/adds_two.rs"]}),
        }])],
    );

    let config = config_for(dir.path());
    let mut driver = ValueLoopDriver::new(state, config, runtime, dir.path().to_path_buf());
    let status = driver.run().await.unwrap();

    assert!(matches!(status, ExitStatus::Success));
    assert_eq!(driver.state.tasks["T1"].status, TaskStatus::Done);
    assert!(driver
        .state
        .verifications
        .values()
        .all(|v| v.status == VerificationStatus::Passed));
    assert!(dir.path().join("DELIVERY_REPORT.md").exists());
}

/// Scenario E5: a near-duplicate task description is rejected by the
/// guardrail, and state is left unchanged.
#[test]
fn duplicate_task_description_is_rejected_by_guardrail() {
    let config = LoopConfig::default();
    let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
    let existing = Task::new("T1", "implement login via OAuth", "v", "a", TaskSource::Plan);
    state.tasks.insert(existing.task_id.clone(), existing);

    let candidate = Task::new("T2", "Implement login with OAuth", "v", "a", TaskSource::Gate);
    let mutation = TaskMutation::Add(candidate);
    let result = guardrails::validate_mutation(&state, &config, &mutation);

    assert!(result.is_err());
    assert_eq!(state.tasks.len(), 1);
}

/// Scenario E6: once a task is blocked on a human action, the decision
/// engine returns INTERACTIVE_PAUSE on every subsequent iteration until the
/// human's verification command exits 0.
#[tokio::test]
async fn decision_engine_holds_on_interactive_pause_until_verification_passes() {
    let dir = tempfile::tempdir().unwrap();
    init_git_repo(dir.path());

    let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
    let mut task = Task::new("T5", "call paid API", "v", "a", TaskSource::Plan);
    task.block_for_human("Set STRIPE_API_KEY");
    state.tasks.insert(task.task_id.clone(), task);
    state.pause = Some(
        PauseState::new("Set STRIPE_API_KEY", "export STRIPE_API_KEY=...")
            .with_blocked_task_id("T5")
            .with_verification_command("test -n \"$STRIPE_API_KEY\""),
    );

    let mut config = config_for(dir.path());
    config.max_loop_iterations = 1;
    assert_eq!(decision_engine::decide(&state, &config), Action::InteractivePause);

    let runtime: Arc<dyn AgentRuntime> = Arc::new(ScriptedAgentRuntime::new());
    let mut driver = ValueLoopDriver::new(state, config, runtime, dir.path().to_path_buf());

    // Without the env var set, the verification command fails and the pause holds.
    std::env::remove_var("STRIPE_API_KEY");
    driver.run().await.unwrap();
    assert!(driver.state.is_paused());
    assert_eq!(driver.state.tasks["T5"].status, TaskStatus::Blocked);

    // Once it's set, the same action resolves the pause and frees the task.
    std::env::set_var("STRIPE_API_KEY", "sk_test_123");
    driver.run().await.unwrap();
    std::env::remove_var("STRIPE_API_KEY");
    assert!(!driver.state.is_paused());
    assert_eq!(driver.state.tasks["T5"].status, TaskStatus::Pending);
}

/// Scenario E4: rolling back to a prior checkpoint reverts tasks completed
/// after it to pending and restores the checkpoint's passing verifications,
/// while preserving retry counts and writing a new rollback commit.
#[tokio::test]
async fn rollback_reverts_tasks_and_verifications_to_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    init_git_repo(dir.path());

    let mut state = LoopState::new("sprint-a", "sprint-a-1", "main");
    let mut kept = Task::new("T1", "d", "v", "a", TaskSource::Plan);
    kept.mark_done(vec![], vec![], None);
    let mut good_verification = Verification::new("core", "adds_two", "true");
    good_verification.record_pass();
    state.tasks.insert(kept.task_id.clone(), kept);
    state
        .verifications
        .insert(good_verification.verification_id.clone(), good_verification);

    let runtime: Arc<dyn AgentRuntime> = Arc::new(ScriptedAgentRuntime::new());
    let config = config_for(dir.path());
    let mut driver = ValueLoopDriver::new(state, config, runtime, dir.path().to_path_buf());

    let hash = {
        let hash_output = Command::new("git").args(["rev-parse", "HEAD"]).current_dir(dir.path()).output().unwrap();
        String::from_utf8(hash_output.stdout).unwrap().trim().to_string()
    };
    driver.state.git.checkpoints.push(GitCheckpoint::new(
        hash,
        "qc_pass",
        ["T1".to_string()].into_iter().collect(),
        ["core/adds_two".to_string()].into_iter().collect(),
        0.6,
    ));

    // Three subsequent tasks regress the codebase.
    for id in ["T2", "T3", "T4"] {
        let mut regressed = Task::new(id, "d", "v", "a", TaskSource::Plan);
        regressed.retry_count = 1;
        regressed.mark_done(vec![], vec![], None);
        driver.state.tasks.insert(id.to_string(), regressed);
    }
    driver.state.verifications.get_mut("core/adds_two").unwrap().record_fail(1, "", "regression");

    driver.rollback_to_checkpoint("qc_pass", "cascading regressions").await.unwrap();

    assert_eq!(driver.state.tasks["T1"].status, TaskStatus::Done);
    for id in ["T2", "T3", "T4"] {
        assert_eq!(driver.state.tasks[id].status, TaskStatus::Pending);
        assert_eq!(driver.state.tasks[id].retry_count, 1);
    }
    assert_eq!(driver.state.verifications["core/adds_two"].status, VerificationStatus::Passed);
    assert_eq!(driver.state.git.rollbacks.len(), 1);
    assert_eq!(driver.state.iterations_without_progress, 0);
}
