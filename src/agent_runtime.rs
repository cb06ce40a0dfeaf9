//! Agent Runtime: the interface the core consumes to talk to a model. The
//! core treats the transport as a black box producing a sequence of tool
//! calls; no concrete network transport is implemented here, only the trait
//! and a deterministic test double.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reasoner,
    Evaluator,
    Researcher,
    Builder,
    Fixer,
    Qc,
    Classifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Reasoning,
    Execution,
    Triage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSetKey {
    Full,
    Readonly,
    Research,
    Minimal,
}

/// Static configuration for a role, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub tier: ModelTier,
    pub max_turns: u32,
    pub tool_set: ToolSetKey,
    pub browser_tools_allowed: bool,
}

pub fn default_role_config(role: Role) -> RoleConfig {
    match role {
        Role::Reasoner => RoleConfig {
            tier: ModelTier::Reasoning,
            max_turns: 40,
            tool_set: ToolSetKey::Full,
            browser_tools_allowed: false,
        },
        Role::Evaluator => RoleConfig {
            tier: ModelTier::Reasoning,
            max_turns: 20,
            tool_set: ToolSetKey::Readonly,
            browser_tools_allowed: true,
        },
        Role::Researcher => RoleConfig {
            tier: ModelTier::Execution,
            max_turns: 15,
            tool_set: ToolSetKey::Research,
            browser_tools_allowed: false,
        },
        Role::Builder => RoleConfig {
            tier: ModelTier::Execution,
            max_turns: 60,
            tool_set: ToolSetKey::Full,
            browser_tools_allowed: false,
        },
        Role::Fixer => RoleConfig {
            tier: ModelTier::Execution,
            max_turns: 30,
            tool_set: ToolSetKey::Full,
            browser_tools_allowed: false,
        },
        Role::Qc => RoleConfig {
            tier: ModelTier::Triage,
            max_turns: 10,
            tool_set: ToolSetKey::Readonly,
            browser_tools_allowed: true,
        },
        Role::Classifier => RoleConfig {
            tier: ModelTier::Triage,
            max_turns: 5,
            tool_set: ToolSetKey::Minimal,
            browser_tools_allowed: false,
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionHandle(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub inputs: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTurns,
    ToolUse,
}

#[derive(Debug, Clone)]
pub struct RuntimeResponse {
    pub final_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("session timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn begin(
        &self,
        role: Role,
        system: &str,
        config: &RoleConfig,
        timeout: Duration,
    ) -> Result<SessionHandle, RuntimeError>;

    async fn send(
        &self,
        handle: SessionHandle,
        user_message: &str,
    ) -> Result<RuntimeResponse, RuntimeError>;
}

/// Deterministic test double: returns pre-scripted responses per call index,
/// used by the driver's own tests and by higher-level integration tests that
/// need a predictable agent without a network transport.
pub struct ScriptedAgentRuntime {
    responses: std::sync::Mutex<BTreeMap<u64, Vec<RuntimeResponse>>>,
    next_handle: std::sync::atomic::AtomicU64,
}

impl ScriptedAgentRuntime {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(BTreeMap::new()),
            next_handle: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Queue the responses a given session handle will return, in call order.
    pub fn script(&self, handle: SessionHandle, responses: Vec<RuntimeResponse>) {
        self.responses.lock().unwrap().insert(handle.0, responses);
    }

    pub fn next_session_handle(&self) -> SessionHandle {
        let id = self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        SessionHandle(id)
    }
}

impl Default for ScriptedAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgentRuntime {
    async fn begin(
        &self,
        _role: Role,
        _system: &str,
        _config: &RoleConfig,
        _timeout: Duration,
    ) -> Result<SessionHandle, RuntimeError> {
        Ok(self.next_session_handle())
    }

    async fn send(
        &self,
        handle: SessionHandle,
        _user_message: &str,
    ) -> Result<RuntimeResponse, RuntimeError> {
        let mut guard = self.responses.lock().unwrap();
        let queue = guard.get_mut(&handle.0).ok_or_else(|| {
            RuntimeError::Transport(format!("no scripted response for handle {}", handle.0))
        })?;
        if queue.is_empty() {
            return Err(RuntimeError::Transport(format!(
                "scripted responses exhausted for handle {}",
                handle.0
            )));
        }
        Ok(queue.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_runtime_returns_queued_responses_in_order() {
        let runtime = ScriptedAgentRuntime::new();
        let handle = runtime.next_session_handle();
        runtime.script(
            handle,
            vec![
                RuntimeResponse {
                    final_text: "first".into(),
                    tool_calls: vec![],
                    usage: Usage::default(),
                    stop_reason: StopReason::EndTurn,
                },
                RuntimeResponse {
                    final_text: "second".into(),
                    tool_calls: vec![],
                    usage: Usage::default(),
                    stop_reason: StopReason::EndTurn,
                },
            ],
        );
        let first = runtime.send(handle, "go").await.unwrap();
        assert_eq!(first.final_text, "first");
        let second = runtime.send(handle, "go").await.unwrap();
        assert_eq!(second.final_text, "second");
    }

    #[test]
    fn builder_role_uses_full_tool_set_and_no_browser() {
        let cfg = default_role_config(Role::Builder);
        assert_eq!(cfg.tool_set, ToolSetKey::Full);
        assert!(!cfg.browser_tools_allowed);
    }
}
