//! Orchestrator error types — one `thiserror` enum per concern, plus a
//! top-level enum the driver and CLI convert everything else into.

use std::path::PathBuf;
use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;
pub type GitResult<T> = Result<T, GitError>;
pub type VerificationResult<T> = Result<T, VerificationError>;
pub type DispatchResult<T> = Result<T, DispatchError>;
pub type LoopResult<T> = Result<T, LoopError>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state file not found at {path}")]
    NotFound { path: PathBuf },

    #[error("state file corrupted: {message}")]
    Corrupted { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crash recovery failed: {message}")]
    RecoveryFailed { message: String },
}

impl StateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {operation} failed: {message}")]
    CommandFailed { operation: String, message: String },

    #[error("refusing to operate on protected branch {branch}")]
    ProtectedBranch { branch: String },

    #[error("rollback budget exhausted ({max} rollbacks already performed)")]
    RollbackBudgetExhausted { max: u32 },

    #[error("checkpoint not found: {label}")]
    CheckpointNotFound { label: String },

    #[error("no changes staged for commit")]
    NothingStaged,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    pub fn command_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CommandFailed { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("lock") || lower.contains("index.lock")
            }
            Self::Io(_) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("verification script not executable: {path}")]
    NotExecutable { path: PathBuf },

    #[error("malformed `# requires:` header in {path}: {message}")]
    MalformedHeader { path: PathBuf, message: String },

    #[error("verification {id} timed out after {timeout_secs}s")]
    TimedOut { id: String, timeout_secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("handler failed: {message}")]
    HandlerFailed { message: String },
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("max iterations ({max}) reached without exit-gate pass")]
    MaxIterationsReached { max: u32 },

    #[error("agent runtime error: {message}")]
    RuntimeError { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl LoopError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::State(e) => e.is_retryable(),
            Self::Git(e) => e.is_retryable(),
            Self::RuntimeError { .. } => true,
            _ => false,
        }
    }
}
