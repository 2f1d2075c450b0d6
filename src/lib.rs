//! # Council
//!
//! Multi-agent query orchestration.
//!
//! A free-form query is decomposed into subtasks, each bound to a named
//! agent. The subtasks are dispatched as a dependency DAG with bounded
//! parallelism, per-attempt timeouts and limited retries, and their partial
//! results are synthesized into one response, even when some fail.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            ORCHESTRATOR                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────┐  │
//! │  │  Decomposer  │─▶│  Dispatcher  │─▶│ Synthesizer  │─▶│Sessions │  │
//! │  └──────────────┘  └──────┬───────┘  └──────────────┘  └─────────┘  │
//! └───────────────────────────┼─────────────────────────────────────────┘
//!                             │ semaphore (max_parallel_agents)
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//!   │   Agent     │    │   Agent     │    │   Agent     │   AgentRegistry
//!   │ (patterns)  │    │ (recommend) │    │  (insight)  │
//!   └─────────────┘    └─────────────┘    └─────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Agent**: A pluggable capability invoked by name
//! - **Subtask**: Planned work for one agent, with optional dependencies
//! - **Dispatch**: Concurrent, timeout- and retry-governed DAG execution
//! - **Synthesis**: Combining partial outcomes into one response
//! - **Session**: The most recent exchange for a caller-supplied id

pub mod agent;
pub mod config;
pub mod decomposer;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod session;
pub mod synthesizer;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_agents;

pub use agent::{Agent, AgentContext, AgentDescriptor, AgentHandle, AgentInput, FnAgent};
pub use config::OrchestratorConfig;
pub use decomposer::{Decomposer, DecompositionRule, KeywordDecomposer, StaticDecomposer};
pub use dispatcher::{DispatchPolicy, Dispatcher};
pub use error::{AgentError, OrchestratorError};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use registry::AgentRegistry;
pub use session::{Session, SessionStore};
pub use synthesizer::{SummarySynthesizer, Synthesizer};
pub use types::{
    AgentResult, Context, FailureKind, Query, ResultStatus, SessionId, Subtask, SubtaskId,
    SynthesizedResponse,
};
