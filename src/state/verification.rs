//! Verification entity — a discovered script and its pass/fail history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const FAILURE_EXCERPT_BYTES: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Passed,
    Failed,
    Blocked,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

/// One failed run, truncated for context efficiency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub exit_code: i32,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_applied: Option<String>,
}

impl FailureRecord {
    pub fn new(attempt: u32, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt,
            exit_code,
            stdout_excerpt: truncate(stdout, FAILURE_EXCERPT_BYTES),
            stderr_excerpt: truncate(stderr, FAILURE_EXCERPT_BYTES),
            fix_applied: None,
        }
    }
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// A discovered verification script, identified as `category/name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub verification_id: String,
    pub category: String,
    pub script_path: String,
    pub status: VerificationStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    /// Other categories that must be fully passing before this one runs.
    #[serde(default)]
    pub requires: BTreeSet<String>,
}

impl Verification {
    pub fn new(category: impl Into<String>, name: impl Into<String>, script_path: impl Into<String>) -> Self {
        let category = category.into();
        let name = name.into();
        Self {
            verification_id: format!("{category}/{name}"),
            category,
            script_path: script_path.into(),
            status: VerificationStatus::Pending,
            attempts: 0,
            failures: Vec::new(),
            requires: BTreeSet::new(),
        }
    }

    pub fn with_requires(mut self, requires: impl IntoIterator<Item = String>) -> Self {
        self.requires.extend(requires);
        self
    }

    pub fn record_pass(&mut self) {
        self.status = VerificationStatus::Passed;
        self.attempts += 1;
    }

    pub fn record_fail(&mut self, exit_code: i32, stdout: &str, stderr: &str) {
        self.attempts += 1;
        self.status = VerificationStatus::Failed;
        self.failures
            .push(FailureRecord::new(self.attempts, exit_code, stdout, stderr));
    }

    /// No verification may be `passed` with a non-empty failure record from
    /// the same attempt number as the current attempt count (testable
    /// property #4).
    pub fn invariant_holds(&self) -> bool {
        if self.status != VerificationStatus::Passed {
            return true;
        }
        !self
            .failures
            .last()
            .is_some_and(|f| f.attempt == self.attempts)
    }
}
