//! Council error types

use thiserror::Error;

use crate::types::{FailureKind, SessionId, SubtaskId};

/// Errors that abort a call into the orchestrator.
///
/// Agent failures never surface here; they are recorded as data on the
/// subtask's [`AgentResult`](crate::types::AgentResult).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Plan contains a dependency cycle
    #[error("Cyclic plan: subtasks {0:?} never become ready")]
    CyclicPlan(Vec<SubtaskId>),

    /// Two subtasks share an id
    #[error("Duplicate subtask id: {0}")]
    DuplicateSubtask(SubtaskId),

    /// A subtask depends on an id that is not in the plan
    #[error("Subtask {subtask} depends on unknown subtask {dependency}")]
    UnknownDependency {
        subtask: SubtaskId,
        dependency: SubtaskId,
    },

    /// Agent not registered
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Session not found (or expired)
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Decomposer could not produce a plan
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures an agent may signal from [`Agent::execute`](crate::agent::Agent::execute).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// Input does not satisfy the agent's expectations
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Something the agent relies on did not respond
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Unexpected fault
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        AgentError::InvalidInput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        AgentError::UpstreamUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AgentError::Internal(msg.into())
    }

    /// Only transient upstream failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::UpstreamUnavailable(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AgentError::InvalidInput(_) => FailureKind::InvalidInput,
            AgentError::UpstreamUnavailable(_) => FailureKind::UpstreamUnavailable,
            AgentError::Internal(_) => FailureKind::InternalError,
        }
    }
}
