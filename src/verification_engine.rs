//! Verification engine: discovers generated scripts, runs them category by
//! category with a requires-graph gate, and maintains the regression
//! baseline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::error::{VerificationError, VerificationResult};
use crate::state::{LoopState, Verification, VerificationStatus};
use crate::subprocess::{CommandSpec, SubprocessRunner};

const REQUIRES_PREFIX: &str = "# requires:";

/// One discovered script: `verifications/<category>/<name>.(sh|py)`.
#[derive(Debug, Clone)]
pub struct DiscoveredScript {
    pub category: String,
    pub name: String,
    pub path: std::path::PathBuf,
    pub requires: BTreeSet<String>,
}

/// Walk `verifications/<category>/*.(sh|py)`, parse the optional
/// `# requires: cat1, cat2` header, and ensure executable permission on POSIX.
pub fn discover(verifications_dir: &Path) -> VerificationResult<Vec<DiscoveredScript>> {
    let mut found = Vec::new();
    if !verifications_dir.exists() {
        return Ok(found);
    }
    for category_entry in std::fs::read_dir(verifications_dir)? {
        let category_entry = category_entry?;
        if !category_entry.file_type()?.is_dir() {
            continue;
        }
        let category = category_entry.file_name().to_string_lossy().to_string();
        for script_entry in std::fs::read_dir(category_entry.path())? {
            let script_entry = script_entry?;
            let path = script_entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("sh") | Some("py")) {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let requires = parse_requires_header(&path)?;
            ensure_executable(&path)?;
            found.push(DiscoveredScript {
                category: category.clone(),
                name,
                path,
                requires,
            });
        }
    }
    Ok(found)
}

fn parse_requires_header(path: &Path) -> VerificationResult<BTreeSet<String>> {
    let content = std::fs::read_to_string(path)?;
    let Some(first_line) = content.lines().next() else {
        return Ok(BTreeSet::new());
    };
    let trimmed = first_line.trim_start_matches('#').trim();
    let stripped = first_line.trim();
    if !stripped.to_lowercase().starts_with(REQUIRES_PREFIX) && !trimmed.to_lowercase().starts_with("requires:") {
        return Ok(BTreeSet::new());
    }
    let after_colon = stripped
        .splitn(2, ':')
        .nth(1)
        .ok_or_else(|| VerificationError::MalformedHeader {
            path: path.to_path_buf(),
            message: "missing ':' after requires".to_string(),
        })?;
    Ok(after_colon
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> VerificationResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.mode() & 0o111 == 0 {
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> VerificationResult<()> {
    Ok(())
}

fn command_for(script: &DiscoveredScript, working_dir: &Path, timeout: Duration) -> CommandSpec {
    let spec = if script.path.extension().and_then(|e| e.to_str()) == Some("py") {
        CommandSpec::new("python3", working_dir)
            .with_args([script.path.to_string_lossy().to_string()])
    } else {
        CommandSpec::new(script.path.to_string_lossy().to_string(), working_dir)
    };
    spec.with_timeout(timeout)
}

/// A category runs only once every verification in it satisfies `requires`
/// (all verifications in the referenced prerequisite categories are passed).
fn category_is_ready(state: &LoopState, category: &str) -> bool {
    let requires: BTreeSet<String> = state
        .verifications
        .values()
        .filter(|v| v.category == category)
        .flat_map(|v| v.requires.iter().cloned())
        .collect();
    requires.iter().all(|required_category| {
        state
            .verifications
            .values()
            .filter(|v| v.category == *required_category)
            .all(|v| v.status == VerificationStatus::Passed)
    })
}

/// Register newly discovered scripts into state (idempotent: existing
/// verifications are left with their history intact).
pub fn register_scripts(state: &mut LoopState, scripts: &[DiscoveredScript]) {
    for script in scripts {
        let id = format!("{}/{}", script.category, script.name);
        if state.verifications.contains_key(&id) {
            continue;
        }
        if !state.verification_category_order.contains(&script.category) {
            state.verification_category_order.push(script.category.clone());
        }
        let verification = Verification::new(
            &script.category,
            &script.name,
            script.path.to_string_lossy().to_string(),
        )
        .with_requires(script.requires.clone());
        state.verifications.insert(id, verification);
    }
}

/// Run every pending/failed verification in the first not-yet-satisfied,
/// ready category. Returns the set of verification ids that ran this pass.
pub async fn run_ready_category(
    state: &mut LoopState,
    working_dir: &Path,
    runner: &SubprocessRunner,
    timeout: Duration,
) -> VerificationResult<BTreeSet<String>> {
    let mut ran = BTreeSet::new();
    for category in state.verification_category_order.clone() {
        if !category_is_ready(state, &category) {
            break;
        }
        let pending_ids: Vec<String> = state
            .verifications
            .iter()
            .filter(|(_, v)| v.category == category && v.status != VerificationStatus::Passed)
            .map(|(id, _)| id.clone())
            .collect();
        if pending_ids.is_empty() {
            continue;
        }
        let specs: Vec<(String, CommandSpec)> = pending_ids
            .iter()
            .map(|id| {
                let v = &state.verifications[id];
                let script = DiscoveredScript {
                    category: v.category.clone(),
                    name: id.split('/').nth(1).unwrap_or_default().to_string(),
                    path: std::path::PathBuf::from(&v.script_path),
                    requires: v.requires.clone(),
                };
                (id.clone(), command_for(&script, working_dir, timeout))
            })
            .collect();
        let outcomes = runner.run_parallel(specs).await;
        for (id, outcome) in outcomes {
            let verification = state.verifications.get_mut(&id).expect("id came from state");
            if outcome.exit_code == 0 {
                verification.record_pass();
                state.regression_baseline.insert(id.clone());
            } else {
                verification.record_fail(outcome.exit_code, &outcome.stdout, &outcome.stderr);
                state.regression_baseline.remove(&id);
                state.research_attempted_for_current_failures = false;
            }
            ran.insert(id);
        }
        let any_failed = pending_ids
            .iter()
            .any(|id| state.verifications[id].status == VerificationStatus::Failed);
        if any_failed {
            break;
        }
    }
    Ok(ran)
}

/// Re-run a single verification by id, independent of category ordering —
/// used by the fix handler to check whether a repair landed.
pub async fn run_single(
    state: &mut LoopState,
    working_dir: &Path,
    runner: &SubprocessRunner,
    timeout: Duration,
    verification_id: &str,
) -> VerificationResult<bool> {
    let Some(v) = state.verifications.get(verification_id) else {
        return Ok(false);
    };
    let script = DiscoveredScript {
        category: v.category.clone(),
        name: verification_id.split('/').nth(1).unwrap_or_default().to_string(),
        path: std::path::PathBuf::from(&v.script_path),
        requires: v.requires.clone(),
    };
    let spec = command_for(&script, working_dir, timeout);
    let outcome = runner.run(&spec).await;
    let verification = state
        .verifications
        .get_mut(verification_id)
        .expect("id checked present above");
    let passed = outcome.exit_code == 0;
    if passed {
        verification.record_pass();
        state.regression_baseline.insert(verification_id.to_string());
    } else {
        verification.record_fail(outcome.exit_code, &outcome.stdout, &outcome.stderr);
        state.regression_baseline.remove(verification_id);
    }
    Ok(passed)
}

/// Re-run every baseline script in parallel; any failure is a regression.
/// Returns the ids that regressed.
pub async fn run_regression(
    state: &mut LoopState,
    working_dir: &Path,
    runner: &SubprocessRunner,
    timeout: Duration,
    causing_task_id: &str,
) -> VerificationResult<BTreeSet<String>> {
    if state.regression_baseline.is_empty() {
        return Ok(BTreeSet::new());
    }
    let baseline: Vec<String> = state.regression_baseline.iter().cloned().collect();
    let specs: Vec<(String, CommandSpec)> = baseline
        .iter()
        .map(|id| {
            let v = &state.verifications[id];
            let script = DiscoveredScript {
                category: v.category.clone(),
                name: id.split('/').nth(1).unwrap_or_default().to_string(),
                path: std::path::PathBuf::from(&v.script_path),
                requires: v.requires.clone(),
            };
            (id.clone(), command_for(&script, working_dir, timeout))
        })
        .collect();
    let outcomes: BTreeMap<String, _> = runner.run_parallel(specs).await;
    let mut regressed = BTreeSet::new();
    for (id, outcome) in outcomes {
        if outcome.exit_code != 0 {
            let verification = state.verifications.get_mut(&id).expect("id came from baseline");
            verification.record_fail(outcome.exit_code, &outcome.stdout, &outcome.stderr);
            if let Some(fix) = verification.failures.last_mut() {
                fix.fix_applied = Some(format!("Regression caused by {causing_task_id}"));
            }
            state.regression_baseline.remove(&id);
            regressed.insert(id);
        }
    }
    Ok(regressed)
}
