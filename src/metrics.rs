//! Per-agent outcome counters and per-query latency

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{AgentResult, FailureKind, ResultStatus};

/// Cumulative outcomes for one agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    /// Subtasks that ended in success
    pub successes: u64,
    /// Subtasks that ended in failure other than a timeout
    pub failures: u64,
    /// Subtasks that ended in a timeout
    pub timeouts: u64,
}

impl AgentStats {
    /// Terminal results counted for the agent
    pub fn total(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }
}

/// Orchestrator-wide query statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueryStats {
    /// Queries processed
    pub queries: u64,
    /// Latency of the most recent query
    pub last_latency_ms: u64,
    /// Mean latency over all queries
    pub avg_latency_ms: f64,
    /// Subtasks that succeeded, across queries
    pub total_succeeded: u64,
    /// Subtasks that did not succeed, across queries
    pub total_failed: u64,
}

#[derive(Default)]
struct Inner {
    agents: HashMap<String, AgentStats>,
    queries: u64,
    total_latency_ms: u64,
    last_latency_ms: u64,
    total_succeeded: u64,
    total_failed: u64,
}

/// Thread-safe metrics sink shared by the dispatcher and orchestrator
#[derive(Default)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    /// Create an empty metrics sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a terminal result against its agent.
    ///
    /// Results for subtasks whose agent was never invoked (unknown agent,
    /// failed dependency, cancelled before start) are not counted.
    pub fn record_result(&self, result: &AgentResult) {
        if result.attempt == 0 {
            return;
        }
        if result.failure_kind() == Some(FailureKind::UnknownAgent) {
            return;
        }

        let mut inner = self.inner.lock();
        let stats = inner.agents.entry(result.agent_name.clone()).or_default();
        match result.status {
            ResultStatus::Success => stats.successes += 1,
            ResultStatus::Failure => stats.failures += 1,
            ResultStatus::Timeout => stats.timeouts += 1,
        }
    }

    /// Record a completed query
    pub fn record_query(&self, latency_ms: u64, succeeded: usize, failed: usize) {
        let mut inner = self.inner.lock();
        inner.queries += 1;
        inner.total_latency_ms += latency_ms;
        inner.last_latency_ms = latency_ms;
        inner.total_succeeded += succeeded as u64;
        inner.total_failed += failed as u64;
    }

    /// Counters for one agent
    pub fn agent(&self, name: &str) -> AgentStats {
        self.inner.lock().agents.get(name).copied().unwrap_or_default()
    }

    /// Counters for every agent that has been invoked
    pub fn agents(&self) -> BTreeMap<String, AgentStats> {
        self.inner
            .lock()
            .agents
            .iter()
            .map(|(name, stats)| (name.clone(), *stats))
            .collect()
    }

    /// Orchestrator-wide query statistics
    pub fn queries(&self) -> QueryStats {
        let inner = self.inner.lock();
        let avg_latency_ms = if inner.queries == 0 {
            0.0
        } else {
            inner.total_latency_ms as f64 / inner.queries as f64
        };
        QueryStats {
            queries: inner.queries,
            last_latency_ms: inner.last_latency_ms,
            avg_latency_ms,
            total_succeeded: inner.total_succeeded,
            total_failed: inner.total_failed,
        }
    }
}
