//! Loop configuration — thresholds and caps read from defaults, an optional
//! TOML file, environment overrides, and CLI flags, in that precedence order.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LoopError, LoopResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_loop_iterations: u32,
    pub max_no_progress: u32,
    pub max_course_corrections: u32,
    pub max_fix_attempts: u32,
    pub generate_verifications_after: u32,
    pub plan_health_after_n_tasks: u32,
    pub critical_eval_interval: u32,
    pub token_budget: u64,
    pub session_timeout_secs: u64,
    pub subprocess_timeout_secs: u64,
    pub max_parallel_workers: usize,
    pub max_rollbacks: u32,
    pub monolith_line_threshold: u32,
    pub long_function_line_threshold: u32,
    pub duplicate_task_cap: u32,
    pub low_test_ratio_floor: f64,
    pub velocity_ema_alpha: f64,
    pub epic_boundary_timeout_secs: u64,
    pub max_mid_loop_tasks: u32,
    pub max_task_description_chars: u32,
    pub max_expected_files: u32,
    pub duplicate_similarity_threshold: f64,
    pub sprint_dir: PathBuf,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 200,
            max_no_progress: 5,
            max_course_corrections: 3,
            max_fix_attempts: 3,
            generate_verifications_after: 1,
            plan_health_after_n_tasks: 5,
            critical_eval_interval: 10,
            token_budget: 0,
            session_timeout_secs: 300,
            subprocess_timeout_secs: 120,
            max_parallel_workers: 10,
            max_rollbacks: 3,
            monolith_line_threshold: 500,
            long_function_line_threshold: 50,
            duplicate_task_cap: 5,
            low_test_ratio_floor: 0.5,
            velocity_ema_alpha: 0.3,
            epic_boundary_timeout_secs: 600,
            max_mid_loop_tasks: 15,
            max_task_description_chars: 600,
            max_expected_files: 5,
            duplicate_similarity_threshold: 0.75,
            sprint_dir: PathBuf::from("."),
        }
    }
}

impl LoopConfig {
    pub fn from_file(path: &std::path::Path) -> LoopResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LoopError::Config {
            message: format!("failed to read config file {}: {e}", path.display()),
        })?;
        toml::from_str(&content).map_err(|e| LoopError::Config {
            message: format!("failed to parse config file {}: {e}", path.display()),
        })
    }

    /// Overlay environment variables (`LOOP_MAX_ITERATIONS`, etc.) on top of
    /// whatever was loaded from a file or the defaults.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LOOP_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                self.max_loop_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("LOOP_TOKEN_BUDGET") {
            if let Ok(n) = v.parse() {
                self.token_budget = n;
            }
        }
        if let Ok(v) = std::env::var("LOOP_MAX_NO_PROGRESS") {
            if let Ok(n) = v.parse() {
                self.max_no_progress = n;
            }
        }
        if let Ok(v) = std::env::var("LOOP_SPRINT_DIR") {
            self.sprint_dir = PathBuf::from(v);
        }
        self
    }

    pub fn resolve_paths(&mut self) {
        if let Ok(abs) = self.sprint_dir.canonicalize() {
            self.sprint_dir = abs;
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.sprint_dir.clone()
    }

    pub fn verifications_dir(&self) -> PathBuf {
        self.sprint_dir.join("verifications")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sprint_dir.join(".loop.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LoopConfig::default();
        assert_eq!(cfg.max_no_progress, 5);
        assert_eq!(cfg.max_course_corrections, 3);
        assert_eq!(cfg.max_rollbacks, 3);
        assert_eq!(cfg.monolith_line_threshold, 500);
        assert_eq!(cfg.max_mid_loop_tasks, 15);
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("LOOP_MAX_NO_PROGRESS", "9");
        let cfg = LoopConfig::default().apply_env_overrides();
        assert_eq!(cfg.max_no_progress, 9);
        std::env::remove_var("LOOP_MAX_NO_PROGRESS");
    }
}
