//! Pause state — set when the loop needs a human before it can continue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseState {
    pub reason: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_task_id: Option<String>,
    pub paused_at: DateTime<Utc>,
}

impl PauseState {
    pub fn new(reason: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            instructions: instructions.into(),
            verification_command: None,
            blocked_task_id: None,
            paused_at: Utc::now(),
        }
    }

    pub fn with_verification_command(mut self, command: impl Into<String>) -> Self {
        self.verification_command = Some(command.into());
        self
    }

    pub fn with_blocked_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.blocked_task_id = Some(task_id.into());
        self
    }
}
