//! Process monitor: zero-LLM-cost scans run after each iteration.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;

use crate::config::LoopConfig;
use crate::state::process_monitor::{CodeHealthKind, CodeHealthWarning, MonitorStatus};
use crate::state::{LoopState, Task, TaskSource, TaskStatus};

/// Update velocity and token-efficiency EMAs, and the CUSUM efficiency track.
pub fn update_metrics(state: &mut LoopState, config: &LoopConfig, delta_value_score: f64, tokens_used: u64) {
    let alpha = config.velocity_ema_alpha;
    let monitor = &mut state.process_monitor;
    monitor.ema_velocity = alpha * delta_value_score + (1.0 - alpha) * monitor.ema_velocity;

    let efficiency = if tokens_used == 0 {
        0.0
    } else {
        delta_value_score / tokens_used as f64
    };
    monitor.ema_token_efficiency = alpha * efficiency + (1.0 - alpha) * monitor.ema_token_efficiency;

    let deviation = monitor.ema_token_efficiency - efficiency;
    monitor.cusum_efficiency = (monitor.cusum_efficiency + deviation).max(0.0);
}

/// Record churn for tasks with retry_count >= 2.
pub fn update_churn(state: &mut LoopState) {
    let churn: HashMap<String, u32> = state
        .tasks
        .values()
        .filter(|t| t.retry_count >= 2)
        .map(|t| (t.task_id.clone(), t.retry_count))
        .collect();
    state.process_monitor.churn = churn;
}

/// Normalize a failure message (strip line numbers, file paths, timestamps)
/// and return a short digest, incrementing the occurrence count.
pub fn record_error_hash(state: &mut LoopState, raw_failure_text: &str) -> String {
    let digest = normalized_error_digest(raw_failure_text);
    *state
        .process_monitor
        .error_hashes
        .entry(digest.clone())
        .or_insert(0) += 1;
    digest
}

fn normalized_error_digest(text: &str) -> String {
    let line_numbers = Regex::new(r":\d+(:\d+)?").unwrap();
    let paths = Regex::new(r"(/[\w.\-]+)+").unwrap();
    let timestamps = Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z)?").unwrap();
    let mut normalized = timestamps.replace_all(text, "<ts>").to_string();
    normalized = paths.replace_all(&normalized, "<path>").to_string();
    normalized = line_numbers.replace_all(&normalized, "").to_string();

    let digest = blake_like_digest(normalized.trim());
    digest
}

/// Short deterministic digest; not cryptographic, only used to dedupe
/// repeated error shapes.
fn blake_like_digest(s: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

/// Two files are flagged DUPLICATE when their line sets overlap this much.
const DUPLICATE_LINE_JACCARD_THRESHOLD: f64 = 0.9;

/// Scan files touched by done tasks, updating current/previous line counts
/// and raising deterministic code-health warnings.
pub fn scan_code_health(state: &mut LoopState, config: &LoopConfig, repo_root: &std::path::Path) {
    let touched_files: Vec<String> = state
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Done)
        .flat_map(|t| t.files_created.iter().chain(t.files_modified.iter()).cloned())
        .collect();

    let mut current_counts = BTreeMap::new();
    let mut contents: BTreeMap<String, String> = BTreeMap::new();
    for file in &touched_files {
        *state
            .process_monitor
            .file_touches
            .entry(file.clone())
            .or_insert(0) += 0;
        let content = std::fs::read_to_string(repo_root.join(file)).unwrap_or_default();
        current_counts.insert(file.clone(), content.lines().count() as u32);
        contents.insert(file.clone(), content);
    }

    let previous_counts = state.process_monitor.file_line_counts.clone();
    let mut warnings = Vec::new();

    let total_lines: u32 = current_counts.values().sum();
    for (file, &lines) in &current_counts {
        if lines >= config.monolith_line_threshold {
            warnings.push(CodeHealthWarning {
                kind: CodeHealthKind::Monolith,
                detail: format!("{file} has {lines} lines (threshold {})", config.monolith_line_threshold),
                file: Some(file.clone()),
                raised_at_iteration: state.iteration,
            });
            maybe_create_refactor_task(state, file);
        }
        if let Some(&previous) = previous_counts.get(file) {
            if previous > 0 && lines as f64 > previous as f64 * 1.5 {
                warnings.push(CodeHealthWarning {
                    kind: CodeHealthKind::RapidGrowth,
                    detail: format!("{file} grew from {previous} to {lines} lines"),
                    file: Some(file.clone()),
                    raised_at_iteration: state.iteration,
                });
            }
        }
        if total_lines > 0 && lines as f64 / total_lines as f64 > 0.6 {
            warnings.push(CodeHealthWarning {
                kind: CodeHealthKind::Concentration,
                detail: format!("{file} holds {lines}/{total_lines} lines (>60%)"),
                file: Some(file.clone()),
                raised_at_iteration: state.iteration,
            });
        }
        if let Some(content) = contents.get(file) {
            for warning in scan_long_functions(file, content, config.long_function_line_threshold, state.iteration) {
                warnings.push(warning);
            }
        }
    }

    warnings.extend(scan_duplicate_files(&contents, state.iteration));
    if let Some(warning) = scan_low_test_ratio(&contents, config.low_test_ratio_floor, state.iteration) {
        warnings.push(warning);
    }

    state.process_monitor.previous_file_line_counts = previous_counts;
    state.process_monitor.file_line_counts = current_counts;
    state.process_monitor.code_health_warnings.extend(warnings);
}

/// Naive brace-depth scan for `fn` bodies longer than the threshold. Good
/// enough to catch genuinely oversized functions without a real parser.
fn scan_long_functions(file: &str, content: &str, threshold: u32, iteration: u32) -> Vec<CodeHealthWarning> {
    let mut warnings = Vec::new();
    let mut depth_at_fn_start: Option<(usize, u32)> = None;
    let mut depth: i32 = 0;
    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if depth_at_fn_start.is_none() && (trimmed.starts_with("fn ") || trimmed.starts_with("pub fn ") || trimmed.starts_with("async fn ") || trimmed.starts_with("pub async fn ")) {
            depth_at_fn_start = Some((line_no, depth as u32));
        }
        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
        if let Some((start, start_depth)) = depth_at_fn_start {
            if depth <= start_depth as i32 && line.contains('}') {
                let length = (line_no - start) as u32;
                if length > threshold {
                    warnings.push(CodeHealthWarning {
                        kind: CodeHealthKind::LongFunction,
                        detail: format!("{file}: function starting at line {} spans {length} lines (threshold {threshold})", start + 1),
                        file: Some(file.to_string()),
                        raised_at_iteration: iteration,
                    });
                }
                depth_at_fn_start = None;
            }
        }
    }
    warnings
}

/// Flag pairs of touched files whose line sets overlap almost completely —
/// a cheap proxy for copy-pasted modules.
fn scan_duplicate_files(contents: &BTreeMap<String, String>, iteration: u32) -> Vec<CodeHealthWarning> {
    let mut warnings = Vec::new();
    let files: Vec<&String> = contents.keys().collect();
    for i in 0..files.len() {
        for j in (i + 1)..files.len() {
            let a = line_set(&contents[files[i]]);
            let b = line_set(&contents[files[j]]);
            if a.len() < 5 || b.len() < 5 {
                continue;
            }
            let intersection = a.intersection(&b).count() as f64;
            let union = a.union(&b).count() as f64;
            let similarity = if union == 0.0 { 0.0 } else { intersection / union };
            if similarity >= DUPLICATE_LINE_JACCARD_THRESHOLD {
                warnings.push(CodeHealthWarning {
                    kind: CodeHealthKind::Duplicate,
                    detail: format!("{} and {} share {:.0}% of their non-blank lines", files[i], files[j], similarity * 100.0),
                    file: Some(files[i].clone()),
                    raised_at_iteration: iteration,
                });
            }
        }
    }
    warnings
}

fn line_set(content: &str) -> std::collections::BTreeSet<&str> {
    content.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Flag when the fraction of touched-file lines that look test-related
/// (inside a `#[cfg(test)]` module or a `#[test]`-annotated function) falls
/// below the configured floor.
fn scan_low_test_ratio(contents: &BTreeMap<String, String>, floor: f64, iteration: u32) -> Option<CodeHealthWarning> {
    let mut total = 0u32;
    let mut test_lines = 0u32;
    for content in contents.values() {
        let mut in_test_mod = false;
        let mut depth: i32 = 0;
        let mut test_mod_depth = 0;
        for line in content.lines() {
            total += 1;
            let trimmed = line.trim_start();
            if trimmed.starts_with("#[cfg(test)]") || trimmed.starts_with("#[test]") {
                in_test_mod = true;
                test_mod_depth = depth;
            }
            if in_test_mod {
                test_lines += 1;
            }
            depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
            if in_test_mod && depth <= test_mod_depth && trimmed.contains('}') {
                in_test_mod = false;
            }
        }
    }
    if total == 0 {
        return None;
    }
    let ratio = test_lines as f64 / total as f64;
    if ratio < floor {
        Some(CodeHealthWarning {
            kind: CodeHealthKind::LowTestRatio,
            detail: format!("test-related lines are {:.1}% of touched code (floor {:.0}%)", ratio * 100.0, floor * 100.0),
            file: None,
            raised_at_iteration: iteration,
        })
    } else {
        None
    }
}

fn maybe_create_refactor_task(state: &mut LoopState, file: &str) {
    let task_id = format!("REFACTOR-{file}");
    if let Some(existing) = state.tasks.get_mut(&task_id) {
        if existing.status == TaskStatus::Done {
            existing.status = TaskStatus::Pending;
        }
        return;
    }
    let task = Task::new(
        task_id.clone(),
        format!("Refactor {file}, which exceeds the monolith line threshold"),
        "keeps the codebase navigable and reviewable",
        format!("{file} is split so no single file exceeds the threshold"),
        TaskSource::Eval,
    )
    .with_expected_files([file.to_string()]);
    state.tasks.insert(task_id, task);
}

/// Evaluate GREEN/YELLOW/RED from the accumulated metrics, suppressed during
/// the first `min_iterations`, during a post-change cooldown, or near budget
/// exhaustion.
pub fn evaluate_trigger(state: &mut LoopState, config: &LoopConfig, min_iterations: u32, cooldown_iterations: u32) {
    if state.iteration < min_iterations {
        return;
    }
    if state.iteration.saturating_sub(state.process_monitor.last_status_change_iteration) < cooldown_iterations {
        return;
    }
    if config.token_budget > 0 && state.tokens.total as f64 > config.token_budget as f64 * 0.95 {
        return;
    }

    let churn_red = state.process_monitor.churn.values().filter(|&&c| c >= 3).count();
    let recurring_errors = state
        .process_monitor
        .error_hashes
        .values()
        .filter(|&&c| c >= 3)
        .count();
    let plateaued = state.iterations_without_progress >= 3;

    let status = if churn_red >= 3 || recurring_errors >= 2 || plateaued {
        MonitorStatus::Red
    } else if !state.process_monitor.churn.is_empty() || !state.process_monitor.code_health_warnings.is_empty() {
        MonitorStatus::Yellow
    } else {
        MonitorStatus::Green
    };
    state.process_monitor.set_status(status, state.iteration);
}
