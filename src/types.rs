//! Core data model shared by every component

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque key/value bag supplied by the caller and delivered verbatim to
/// every agent.
pub type Context = serde_json::Map<String, Value>;

/// Identifier of a subtask, unique within one plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(String);

impl SubtaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubtaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Caller-supplied session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-call correlation id, used only for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A submitted natural-language request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: Context::new(),
            session_id: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One unit of planned work bound to a named agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: SubtaskId,
    pub agent_name: String,
    pub input: Value,
    #[serde(default)]
    pub depends_on: Vec<SubtaskId>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, agent_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: SubtaskId::new(id),
            agent_name: agent_name.into(),
            input,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(SubtaskId::new(id));
        self
    }
}

/// Terminal status of a subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
    Timeout,
}

/// Why a subtask did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    UnknownAgent,
    InvalidInput,
    UpstreamUnavailable,
    Timeout,
    DependencyFailed,
    InternalError,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    pub kind: FailureKind,
    pub message: String,
}

/// Terminal outcome of one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub subtask_id: SubtaskId,
    pub agent_name: String,
    pub status: ResultStatus,
    pub payload: Option<Value>,
    pub error: Option<ResultError>,
    pub latency_ms: u64,
    /// Number of agent invocations made; zero when the agent was never called
    pub attempt: u32,
}

impl AgentResult {
    pub fn success(subtask: &Subtask, payload: Value, latency_ms: u64, attempt: u32) -> Self {
        Self {
            subtask_id: subtask.id.clone(),
            agent_name: subtask.agent_name.clone(),
            status: ResultStatus::Success,
            payload: Some(payload),
            error: None,
            latency_ms,
            attempt,
        }
    }

    pub fn failure(
        subtask: &Subtask,
        kind: FailureKind,
        message: impl Into<String>,
        latency_ms: u64,
        attempt: u32,
    ) -> Self {
        let status = if kind == FailureKind::Timeout {
            ResultStatus::Timeout
        } else {
            ResultStatus::Failure
        };
        Self {
            subtask_id: subtask.id.clone(),
            agent_name: subtask.agent_name.clone(),
            status,
            payload: None,
            error: Some(ResultError {
                kind,
                message: message.into(),
            }),
            latency_ms,
            attempt,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Response returned for every completed query, including fully failed ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedResponse {
    pub query: String,
    pub results: Vec<AgentResult>,
    pub summary: String,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub latency_ms: u64,
}

/// Shared, read-only context handed to every agent of a query
pub type SharedContext = Arc<Context>;
