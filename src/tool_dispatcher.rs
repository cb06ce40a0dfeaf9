//! Tool dispatcher: the closed catalog of structured tools a model session
//! can call. Every call is transactional — `tasks`, `verifications`, and
//! `agent_results` are snapshotted before the handler runs and restored on
//! any handler error.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LoopConfig;
use crate::error::DispatchError;
use crate::guardrails::{self, TaskMutation};
use crate::state::coherence::{CoherenceReport, CoherenceVerdict};
use crate::state::epic::{DetailLevel, Epic};
use crate::state::vrc::{VrcDepth, VrcRecommendation, VrcSnapshot};
use crate::state::{LoopState, PauseState, Task, TaskSource, TaskStatus};

pub struct ToolDispatcher;

#[derive(Debug, Clone)]
struct Snapshot {
    tasks: std::collections::BTreeMap<String, Task>,
    verifications: std::collections::BTreeMap<String, crate::state::Verification>,
    agent_results: crate::state::loop_state::AgentResults,
}

fn snapshot(state: &LoopState) -> Snapshot {
    Snapshot {
        tasks: state.tasks.clone(),
        verifications: state.verifications.clone(),
        agent_results: state.agent_results.clone(),
    }
}

fn restore(state: &mut LoopState, snapshot: Snapshot) {
    state.tasks = snapshot.tasks;
    state.verifications = snapshot.verifications;
    state.agent_results = snapshot.agent_results;
}

impl ToolDispatcher {
    /// Dispatch a tool call. Returns a JSON-serialized `{ok: true, result}` or
    /// `{error, rolled_back: true}`. Unknown tool names are returned without
    /// snapshotting, per the no-op-on-unknown contract.
    pub fn dispatch(state: &mut LoopState, config: &LoopConfig, name: &str, inputs: Value) -> Value {
        if !KNOWN_TOOLS.contains(&name) {
            return json!({"error": "Unknown tool"});
        }
        let before = snapshot(state);
        match handle(state, config, name, inputs) {
            Ok(result) => {
                state.agent_results.insert(name.to_string(), result.clone());
                json!({"ok": true, "result": result})
            }
            Err(e) => {
                restore(state, before);
                json!({"error": e.to_string(), "rolled_back": true})
            }
        }
    }
}

const KNOWN_TOOLS: &[&str] = &[
    "manage_task",
    "report_task_complete",
    "report_discovery",
    "report_critique",
    "report_triage",
    "report_vrc",
    "report_eval_finding",
    "report_research",
    "report_vision_validation",
    "report_strategy_change",
    "report_epic_decomposition",
    "report_epic_summary",
    "report_coherence",
    "report_course_correction",
    "request_human_action",
];

fn handle(state: &mut LoopState, config: &LoopConfig, name: &str, inputs: Value) -> Result<Value, DispatchError> {
    match name {
        "manage_task" => manage_task(state, config, inputs),
        "report_task_complete" => report_task_complete(state, inputs),
        "report_discovery" => report_discovery(state, inputs),
        "report_critique" => report_critique(state, inputs),
        "report_triage" => report_triage(state, inputs),
        "report_vrc" => report_vrc(state, inputs),
        "report_eval_finding" => report_eval_finding(state, inputs),
        "report_research" => report_research(state, inputs),
        "report_vision_validation" => report_vision_validation(state, inputs),
        "report_strategy_change" => report_strategy_change(state, inputs),
        "report_epic_decomposition" => report_epic_decomposition(state, inputs),
        "report_epic_summary" => report_epic_summary(state, inputs),
        "report_coherence" => report_coherence(state, inputs),
        "report_course_correction" => report_course_correction(state, inputs),
        "request_human_action" => request_human_action(state, inputs),
        other => Err(DispatchError::UnknownTool {
            name: other.to_string(),
        }),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(inputs: Value) -> Result<T, DispatchError> {
    serde_json::from_value(inputs).map_err(|e| DispatchError::validation(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ManageTaskInput {
    Add {
        task_id: String,
        description: String,
        value: String,
        acceptance: String,
        #[serde(default)]
        dependencies: BTreeSet<String>,
        #[serde(default)]
        expected_files: Vec<String>,
        #[serde(default)]
        epic_id: Option<String>,
    },
    Modify {
        task_id: String,
        #[serde(default)]
        dependencies: Option<BTreeSet<String>>,
        #[serde(default)]
        description: Option<String>,
    },
    Remove {
        task_id: String,
    },
}

fn manage_task(state: &mut LoopState, config: &LoopConfig, inputs: Value) -> Result<Value, DispatchError> {
    let input: ManageTaskInput = parse(inputs)?;
    match input {
        ManageTaskInput::Add {
            task_id,
            description,
            value,
            acceptance,
            dependencies,
            expected_files,
            epic_id,
        } => {
            let mut task = Task::new(task_id, description, value, acceptance, TaskSource::Gate)
                .with_dependencies(dependencies)
                .with_expected_files(expected_files);
            if let Some(epic_id) = epic_id {
                task = task.with_epic(epic_id);
            }
            let mutation = TaskMutation::Add(task.clone());
            guardrails::validate_mutation(state, config, &mutation)?;
            state.tasks.insert(task.task_id.clone(), task);
            Ok(json!({"added": true}))
        }
        ManageTaskInput::Modify {
            task_id,
            dependencies,
            description,
        } => {
            let mutation = TaskMutation::Modify {
                task_id: task_id.clone(),
                dependencies: dependencies.clone(),
                description: description.clone(),
                status: None,
            };
            guardrails::validate_mutation(state, config, &mutation)?;
            let task = state.tasks.get_mut(&task_id).expect("validated to exist");
            if let Some(deps) = dependencies {
                task.dependencies = deps;
            }
            if let Some(desc) = description {
                task.description = desc;
            }
            Ok(json!({"modified": true}))
        }
        ManageTaskInput::Remove { task_id } => {
            let mutation = TaskMutation::Remove {
                task_id: task_id.clone(),
            };
            guardrails::validate_mutation(state, config, &mutation)?;
            state.tasks.remove(&task_id);
            Ok(json!({"removed": true}))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportTaskCompleteInput {
    task_id: String,
    #[serde(default)]
    files_created: Vec<String>,
    #[serde(default)]
    files_modified: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
}

fn report_task_complete(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportTaskCompleteInput = parse(inputs)?;
    let task = state
        .tasks
        .get_mut(&input.task_id)
        .ok_or_else(|| DispatchError::validation(format!("task {} does not exist", input.task_id)))?;
    task.mark_done(input.files_created, input.files_modified, input.notes);
    Ok(json!({"task_id": task.task_id}))
}

fn report_discovery(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let context: crate::state::SprintContext = parse(inputs)?;
    state.context = Some(context);
    Ok(json!({"recorded": true}))
}

#[derive(Debug, Deserialize)]
struct ReportCritiqueInput {
    verdict: String,
    reason: String,
    #[serde(default)]
    amendments: Vec<String>,
}

fn report_critique(_state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportCritiqueInput = parse(inputs)?;
    if !["APPROVE", "AMEND", "DESCOPE", "REJECT"].contains(&input.verdict.as_str()) {
        return Err(DispatchError::validation(format!(
            "invalid verdict {}",
            input.verdict
        )));
    }
    Ok(json!({"verdict": input.verdict, "reason": input.reason, "amendments": input.amendments}))
}

#[derive(Debug, Deserialize)]
struct ReportTriageInput {
    groups: Vec<TriageGroup>,
}

#[derive(Debug, Deserialize)]
struct TriageGroup {
    root_cause: String,
    verification_ids: Vec<String>,
}

fn report_triage(_state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportTriageInput = parse(inputs)?;
    Ok(json!({"groups": input.groups.len()}))
}

#[derive(Debug, Deserialize)]
struct ReportVrcInput {
    depth: String,
    value_score: f64,
    deliverables_total: u32,
    deliverables_verified: u32,
    deliverables_blocked: u32,
    #[serde(default)]
    gaps: Vec<String>,
    recommendation: String,
    summary: String,
}

fn report_vrc(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportVrcInput = parse(inputs)?;
    let depth = match input.depth.as_str() {
        "quick" => VrcDepth::Quick,
        "full" => VrcDepth::Full,
        other => return Err(DispatchError::validation(format!("invalid depth {other}"))),
    };
    let recommendation = match input.recommendation.as_str() {
        "CONTINUE" => VrcRecommendation::Continue,
        "COURSE_CORRECT" => VrcRecommendation::CourseCorrect,
        "DESCOPE" => VrcRecommendation::Descope,
        "SHIP_READY" => VrcRecommendation::ShipReady,
        other => {
            return Err(DispatchError::validation(format!(
                "invalid recommendation {other}"
            )))
        }
    };
    let mut snapshot = VrcSnapshot::new(state.iteration, depth, input.value_score);
    snapshot.deliverables_total = input.deliverables_total;
    snapshot.deliverables_verified = input.deliverables_verified;
    snapshot.deliverables_blocked = input.deliverables_blocked;
    snapshot.gaps = input.gaps;
    snapshot.recommendation = recommendation;
    snapshot.summary = input.summary;
    state.vrc_history.push(snapshot);
    Ok(json!({"recorded": true}))
}

#[derive(Debug, Deserialize)]
struct ReportEvalFindingInput {
    severity: String,
    description: String,
    #[serde(default)]
    task_id: Option<String>,
}

fn report_eval_finding(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportEvalFindingInput = parse(inputs)?;
    let auto_create = matches!(input.severity.as_str(), "critical" | "blocking");
    if auto_create {
        let task_id = input
            .task_id
            .unwrap_or_else(|| format!("EVAL-{}", state.tasks.len() + 1));
        let task = Task::new(
            task_id.clone(),
            input.description,
            "addresses a critical-evaluation finding",
            "finding is resolved",
            TaskSource::CriticalEval,
        );
        state.tasks.insert(task_id.clone(), task);
        return Ok(json!({"auto_created_task": task_id}));
    }
    Ok(json!({"auto_created_task": Value::Null}))
}

#[derive(Debug, Deserialize)]
struct ReportResearchInput {
    topic: String,
    findings: String,
    #[serde(default)]
    sources: Vec<String>,
}

fn report_research(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportResearchInput = parse(inputs)?;
    state.research_briefs.push(crate::state::ResearchBrief {
        topic: input.topic,
        findings: input.findings,
        sources: input.sources,
        iteration: state.iteration,
        timestamp: chrono::Utc::now(),
    });
    state.research_attempted_for_current_failures = true;
    Ok(json!({"recorded": true}))
}

#[derive(Debug, Deserialize)]
struct ReportVisionValidationInput {
    verdict: String,
    #[serde(default)]
    issues: Vec<VisionIssue>,
}

#[derive(Debug, Deserialize)]
struct VisionIssue {
    severity: String,
    #[serde(default)]
    description: String,
}

fn report_vision_validation(_state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportVisionValidationInput = parse(inputs)?;
    if !["PASS", "NEEDS_REVISION"].contains(&input.verdict.as_str()) {
        return Err(DispatchError::validation(format!(
            "invalid verdict {}",
            input.verdict
        )));
    }
    for issue in &input.issues {
        if !["hard", "soft"].contains(&issue.severity.as_str()) {
            return Err(DispatchError::validation(format!(
                "invalid issue severity {}",
                issue.severity
            )));
        }
    }
    Ok(json!({"verdict": input.verdict, "issue_count": input.issues.len()}))
}

fn report_strategy_change(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let changes: std::collections::HashMap<String, Value> = parse(inputs)?;
    state.process_monitor.record_strategy_change(state.iteration, changes);
    Ok(json!({"recorded": true}))
}

#[derive(Debug, Deserialize)]
struct EpicInput {
    id: String,
    title: String,
    value_statement: String,
    #[serde(default)]
    deliverables: Vec<String>,
    #[serde(default)]
    completion_criteria: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    detail_level: String,
}

fn report_epic_decomposition(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let epics: Vec<EpicInput> = parse(inputs)?;
    if epics.len() < 2 || epics.len() > 5 {
        return Err(DispatchError::validation(
            "epic decomposition must produce between 2 and 5 epics",
        ));
    }
    state.epics = epics
        .into_iter()
        .map(|e| {
            let detail_level = match e.detail_level.as_str() {
                "full" => DetailLevel::Full,
                "sketch" => DetailLevel::Sketch,
                other => return Err(DispatchError::validation(format!("invalid detail_level {other}"))),
            };
            let mut epic = Epic::new(e.id, e.title, e.value_statement, detail_level);
            epic.deliverables = e.deliverables;
            epic.completion_criteria = e.completion_criteria;
            epic.dependencies = e.dependencies;
            Ok(epic)
        })
        .collect::<Result<Vec<_>, DispatchError>>()?;
    state.current_epic_index = Some(0);
    Ok(json!({"epic_count": state.epics.len()}))
}

#[derive(Debug, Deserialize)]
struct ReportEpicSummaryInput {
    epic_id: String,
    summary: String,
}

fn report_epic_summary(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportEpicSummaryInput = parse(inputs)?;
    let epic = state
        .epics
        .iter_mut()
        .find(|e| e.id == input.epic_id)
        .ok_or_else(|| DispatchError::validation(format!("epic {} does not exist", input.epic_id)))?;
    epic.feedback_notes = Some(input.summary);
    Ok(json!({"recorded": true}))
}

#[derive(Debug, Deserialize)]
struct ReportCoherenceInput {
    verdict: String,
    summary: String,
    #[serde(default)]
    drift_points: Vec<String>,
}

fn report_coherence(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportCoherenceInput = parse(inputs)?;
    let verdict = match input.verdict.as_str() {
        "ALIGNED" => CoherenceVerdict::Aligned,
        "DRIFTING" => CoherenceVerdict::Drifting,
        "MISALIGNED" => CoherenceVerdict::Misaligned,
        other => return Err(DispatchError::validation(format!("invalid verdict {other}"))),
    };
    let mut report = CoherenceReport::new(state.iteration, verdict, input.summary);
    report.drift_points = input.drift_points;
    state.coherence_history.push(report);
    Ok(json!({"recorded": true}))
}

#[derive(Debug, Deserialize)]
struct ReportCourseCorrectionInput {
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    to_label: Option<String>,
}

fn report_course_correction(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: ReportCourseCorrectionInput = parse(inputs)?;
    let valid_kinds = [
        "restructure",
        "descope",
        "new_tasks",
        "regenerate_tests",
        "rollback",
        "escalate",
    ];
    if !valid_kinds.contains(&input.kind.as_str()) {
        return Err(DispatchError::validation(format!("invalid kind {}", input.kind)));
    }
    if input.kind == "rollback" && input.to_label.is_none() {
        return Err(DispatchError::validation("rollback course correction requires to_label"));
    }
    state.record_progress(false, format!("course_correct: {}", input.kind), 0);
    Ok(json!({"kind": input.kind, "reason": input.reason, "to_label": input.to_label}))
}

#[derive(Debug, Deserialize)]
struct RequestHumanActionInput {
    task_id: String,
    action: String,
    instructions: String,
    #[serde(default)]
    verification_command: Option<String>,
}

fn request_human_action(state: &mut LoopState, inputs: Value) -> Result<Value, DispatchError> {
    let input: RequestHumanActionInput = parse(inputs)?;
    let task = state
        .tasks
        .get_mut(&input.task_id)
        .ok_or_else(|| DispatchError::validation(format!("task {} does not exist", input.task_id)))?;
    task.block_for_human(&input.action);
    let mut pause = PauseState::new(input.action, input.instructions).with_blocked_task_id(&input.task_id);
    if let Some(cmd) = input.verification_command {
        pause = pause.with_verification_command(cmd);
    }
    state.pause = Some(pause);
    Ok(json!({"paused": true}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> LoopState {
        LoopState::new("sprint-a", "sprint-a-1", "main")
    }

    #[test]
    fn unknown_tool_returns_error_without_snapshotting() {
        let mut s = state();
        let result = ToolDispatcher::dispatch(&mut s, &LoopConfig::default(), "not_a_tool", json!({}));
        assert_eq!(result["error"], "Unknown tool");
    }

    #[test]
    fn manage_task_add_then_complete_round_trips() {
        let mut s = state();
        let config = LoopConfig::default();
        let add = json!({
            "action": "add",
            "task_id": "T1",
            "description": "build the login form",
            "value": "users can sign in",
            "acceptance": "login form renders and submits",
        });
        let result = ToolDispatcher::dispatch(&mut s, &config, "manage_task", add);
        assert_eq!(result["ok"], true);
        assert!(s.tasks.contains_key("T1"));

        let complete = json!({"task_id": "T1", "files_created": ["login.rs"]});
        let result = ToolDispatcher::dispatch(&mut s, &config, "report_task_complete", complete);
        assert_eq!(result["ok"], true);
        assert_eq!(s.tasks["T1"].status, TaskStatus::Done);
    }

    #[test]
    fn validation_failure_rolls_back_without_mutating_state() {
        let mut s = state();
        let config = LoopConfig::default();
        let add = json!({
            "action": "add",
            "task_id": "T1",
            "description": "x",
            "value": "",
            "acceptance": "y",
        });
        let before_len = s.tasks.len();
        let result = ToolDispatcher::dispatch(&mut s, &config, "manage_task", add);
        assert!(result.get("error").is_some());
        assert_eq!(result["rolled_back"], true);
        assert_eq!(s.tasks.len(), before_len);
    }

    #[test]
    fn request_human_action_installs_pause_and_blocks_task() {
        let mut s = state();
        let config = LoopConfig::default();
        let task = Task::new("T1", "d", "v", "a", TaskSource::Plan);
        s.tasks.insert(task.task_id.clone(), task);
        let req = json!({
            "task_id": "T1",
            "action": "provide API key",
            "instructions": "set STRIPE_KEY in .env.local",
        });
        ToolDispatcher::dispatch(&mut s, &config, "request_human_action", req);
        assert!(s.is_paused());
        assert_eq!(s.tasks["T1"].status, TaskStatus::Blocked);
    }
}
