//! Agent contract - a single pluggable capability

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::types::{Context, SharedContext, SubtaskId};

/// Input handed to an agent for one attempt
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// The subtask's planned input
    pub payload: Value,
    /// Successful payloads of the subtask's dependencies
    pub dependencies: HashMap<SubtaskId, Value>,
}

impl AgentInput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            dependencies: HashMap::new(),
        }
    }

    /// Output of a dependency, if it was declared
    pub fn dependency(&self, id: &SubtaskId) -> Option<&Value> {
        self.dependencies.get(id)
    }
}

/// Per-attempt execution context
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub subtask_id: SubtaskId,
    /// 1-based attempt number
    pub attempt: u32,
    context: SharedContext,
    cancel: CancellationToken,
}

impl AgentContext {
    pub(crate) fn new(
        subtask_id: SubtaskId,
        attempt: u32,
        context: SharedContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subtask_id,
            attempt,
            context,
            cancel,
        }
    }

    /// Caller-supplied context bag
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Cancelled when the attempt times out or the query is aborted.
    ///
    /// Agents that await this can stop early; the orchestrator abandons the
    /// attempt either way.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Name, role and capability tags of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentDescriptor {
    /// Name the agent is registered and dispatched under
    pub name: String,
    /// Free-form role label
    pub role: String,
    /// Capability tags, unique and sorted
    pub capabilities: BTreeSet<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: "specialist".into(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }
}

/// A unit of capability invoked by name.
///
/// Implementations must be safe to call concurrently: several queries may
/// dispatch to the same agent at once. A retried attempt is a new call, so
/// `execute` must tolerate running more than once for the same subtask.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> AgentDescriptor;

    async fn execute(&self, input: AgentInput, ctx: AgentContext) -> Result<Value, AgentError>;
}

/// Shared handle to a registered agent
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<dyn Agent>,
}

impl AgentHandle {
    pub fn new(agent: impl Agent + 'static) -> Self {
        Self {
            inner: Arc::new(agent),
        }
    }

    pub fn from_arc(agent: Arc<dyn Agent>) -> Self {
        Self { inner: agent }
    }

    pub fn name(&self) -> String {
        self.inner.descriptor().name
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = dyn Agent;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("descriptor", &self.inner.descriptor())
            .finish()
    }
}

/// Agent backed by an async closure. Handy for wiring simple capabilities
/// and for tests.
pub struct FnAgent<F> {
    descriptor: AgentDescriptor,
    f: F,
}

impl<F, Fut> FnAgent<F>
where
    F: Fn(AgentInput, AgentContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, AgentError>> + Send,
{
    pub fn new(descriptor: AgentDescriptor, f: F) -> Self {
        Self { descriptor, f }
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(AgentInput, AgentContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, AgentError>> + Send,
{
    fn descriptor(&self) -> AgentDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, input: AgentInput, ctx: AgentContext) -> Result<Value, AgentError> {
        (self.f)(input, ctx).await
    }
}
