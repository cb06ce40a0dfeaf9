//! Process monitor state: deterministic velocity/health metrics and strategy history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorStatus {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        };
        write!(f, "{s}")
    }
}

/// A code-health warning raised by one of the deterministic scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeHealthKind {
    Monolith,
    RapidGrowth,
    Concentration,
    LongFunction,
    Duplicate,
    LowTestRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeHealthWarning {
    pub kind: CodeHealthKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub raised_at_iteration: u32,
}

/// A recorded strategy change, applied after a RED trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyChange {
    pub iteration: u32,
    pub changes: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMonitorState {
    pub ema_velocity: f64,
    pub ema_token_efficiency: f64,
    pub cusum_efficiency: f64,
    /// task_id -> retry_count, for tasks with retry_count >= 2.
    #[serde(default)]
    pub churn: HashMap<String, u32>,
    /// normalized error digest -> occurrence count.
    #[serde(default)]
    pub error_hashes: HashMap<String, u32>,
    /// file path -> number of done tasks that touched it.
    #[serde(default)]
    pub file_touches: HashMap<String, u32>,
    #[serde(default)]
    pub file_line_counts: HashMap<String, u32>,
    #[serde(default)]
    pub previous_file_line_counts: HashMap<String, u32>,
    #[serde(default)]
    pub code_health_warnings: Vec<CodeHealthWarning>,
    #[serde(default)]
    pub duplicate_blocks_found: u32,
    #[serde(default)]
    pub long_functions_found: u32,
    pub status: MonitorStatus,
    #[serde(default)]
    pub current_strategy: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub strategy_history: Vec<StrategyChange>,
    /// Iteration at which the status last changed, for the post-change cooldown.
    #[serde(default)]
    pub last_status_change_iteration: u32,
}

impl Default for ProcessMonitorState {
    fn default() -> Self {
        Self {
            ema_velocity: 0.0,
            ema_token_efficiency: 0.0,
            cusum_efficiency: 0.0,
            churn: HashMap::new(),
            error_hashes: HashMap::new(),
            file_touches: HashMap::new(),
            file_line_counts: HashMap::new(),
            previous_file_line_counts: HashMap::new(),
            code_health_warnings: Vec::new(),
            duplicate_blocks_found: 0,
            long_functions_found: 0,
            status: MonitorStatus::Green,
            current_strategy: HashMap::new(),
            strategy_history: Vec::new(),
            last_status_change_iteration: 0,
        }
    }
}

impl ProcessMonitorState {
    pub fn set_status(&mut self, status: MonitorStatus, iteration: u32) {
        if status != self.status {
            self.last_status_change_iteration = iteration;
        }
        self.status = status;
    }

    pub fn record_strategy_change(
        &mut self,
        iteration: u32,
        changes: HashMap<String, serde_json::Value>,
    ) {
        for (k, v) in &changes {
            self.current_strategy.insert(k.clone(), v.clone());
        }
        self.strategy_history.push(StrategyChange {
            iteration,
            changes,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_status_updates_change_iteration_only_on_transition() {
        let mut m = ProcessMonitorState::default();
        m.set_status(MonitorStatus::Green, 5);
        assert_eq!(m.last_status_change_iteration, 0);
        m.set_status(MonitorStatus::Red, 6);
        assert_eq!(m.last_status_change_iteration, 6);
        m.set_status(MonitorStatus::Red, 7);
        assert_eq!(m.last_status_change_iteration, 6);
    }
}
