//! Git-side state mirrored into LoopState: checkpoints, branch bookkeeping, rollback log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A commit designated known-good: all verifications current at the time were passing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCheckpoint {
    pub commit_hash: String,
    pub label: String,
    pub tasks_completed: BTreeSet<String>,
    pub verifications_passing: BTreeSet<String>,
    pub value_score: f64,
    pub created_at: DateTime<Utc>,
}

impl GitCheckpoint {
    pub fn new(
        commit_hash: impl Into<String>,
        label: impl Into<String>,
        tasks_completed: BTreeSet<String>,
        verifications_passing: BTreeSet<String>,
        value_score: f64,
    ) -> Self {
        Self {
            commit_hash: commit_hash.into(),
            label: label.into(),
            tasks_completed,
            verifications_passing,
            value_score,
            created_at: Utc::now(),
        }
    }
}

/// Record of an executed rollback, appended to `GitState::rollbacks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub from_hash: String,
    pub to_hash: String,
    pub label: String,
    pub reason: String,
    pub iteration: u32,
    pub new_commit_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Git-related state persisted alongside the rest of LoopState.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitState {
    pub branch: String,
    pub original_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stash_ref: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<GitCheckpoint>,
    #[serde(default)]
    pub rollbacks: Vec<RollbackRecord>,
    pub sensitive_patterns: Vec<String>,
    pub protected_branches: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit_hash: Option<String>,
    pub max_rollbacks: u32,
}

impl GitState {
    pub fn new(branch: impl Into<String>, original_branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            original_branch: original_branch.into(),
            stash_ref: None,
            checkpoints: Vec::new(),
            rollbacks: Vec::new(),
            sensitive_patterns: default_sensitive_patterns(),
            protected_branches: default_protected_branches(),
            last_commit_hash: None,
            max_rollbacks: 3,
        }
    }

    pub fn latest_checkpoint(&self) -> Option<&GitCheckpoint> {
        self.checkpoints.last()
    }

    pub fn checkpoint_by_label(&self, label: &str) -> Option<&GitCheckpoint> {
        self.checkpoints.iter().rev().find(|c| c.label == label)
    }

    pub fn rollbacks_remaining(&self) -> u32 {
        self.max_rollbacks.saturating_sub(self.rollbacks.len() as u32)
    }
}

pub fn default_protected_branches() -> BTreeSet<String> {
    ["main", "master", "production", "prod"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn default_sensitive_patterns() -> Vec<String> {
    [
        ".env",
        ".env.*",
        "*.pem",
        "*.key",
        "*secret*",
        "*credential*",
        "*password*",
        "*.p12",
        "*.pfx",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
