//! Main orchestrator - decompose, dispatch, synthesize, record

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, Span};

use crate::config::OrchestratorConfig;
use crate::decomposer::{Decomposer, KeywordDecomposer};
use crate::dispatcher::{DispatchPolicy, Dispatcher};
use crate::error::OrchestratorError;
use crate::metrics::{AgentStats, Metrics};
use crate::registry::AgentRegistry;
use crate::session::{Session, SessionStore};
use crate::synthesizer::{SummarySynthesizer, Synthesizer};
use crate::types::{Context, Query, QueryId, SessionId, SynthesizedResponse};

/// The query orchestrator.
///
/// Owns the agent registry, decomposer, dispatcher, synthesizer and session
/// store. Build one at startup with [`Orchestrator::builder`] and share it.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    decomposer: Arc<dyn Decomposer>,
    synthesizer: Arc<dyn Synthesizer>,
    dispatcher: Dispatcher,
    sessions: SessionStore,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Start building an orchestrator
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Answer a query
    pub async fn process_query(&self, query: Query) -> Result<SynthesizedResponse, OrchestratorError> {
        self.process_query_with_cancel(query, CancellationToken::new()).await
    }

    /// Answer a query, aborting outstanding subtasks when `cancel` fires.
    ///
    /// Agent failures, timeouts and cancellation still produce a response;
    /// only a plan that violates the decomposer contract is an error.
    #[instrument(skip_all, fields(query_id = %QueryId::new(), session = tracing::field::Empty))]
    pub async fn process_query_with_cancel(
        &self,
        query: Query,
        cancel: CancellationToken,
    ) -> Result<SynthesizedResponse, OrchestratorError> {
        let started = Instant::now();
        if let Some(id) = &query.session_id {
            Span::current().record("session", tracing::field::display(id));
        }

        let subtasks = self.decomposer.decompose(&query, &self.registry).await?;

        let results = if subtasks.is_empty() {
            info!("No applicable agent for query");
            Vec::new()
        } else {
            let context = Arc::new(query.context.clone());
            self.dispatcher.dispatch(&subtasks, context, cancel).await?
        };

        let mut response = self.synthesizer.synthesize(&query, &subtasks, &results);
        response.latency_ms = started.elapsed().as_millis() as u64;

        self.metrics
            .record_query(response.latency_ms, response.succeeded_count, response.failed_count);

        if let Some(session_id) = &query.session_id {
            self.sessions.upsert(Session::new(
                session_id.clone(),
                query.text.clone(),
                subtasks,
                response.clone(),
            ));
        }

        info!(
            succeeded = response.succeeded_count,
            failed = response.failed_count,
            latency_ms = response.latency_ms,
            "Query processed"
        );

        Ok(response)
    }

    /// Ask for a recommendation of the given kind
    pub async fn recommend(
        &self,
        kind: &str,
        context: Context,
        session_id: Option<SessionId>,
    ) -> Result<SynthesizedResponse, OrchestratorError> {
        let mut query = Query::new(format!("recommend {} for me", kind.trim())).with_context(context);
        query.session_id = session_id;
        self.process_query(query).await
    }

    /// Latest exchange for a session
    pub fn session(&self, id: &SessionId) -> Result<Session, OrchestratorError> {
        self.sessions
            .get(id)
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))
    }

    /// Drop a session, returning whether it existed
    pub fn delete_session(&self, id: &SessionId) -> bool {
        self.sessions.delete(id)
    }

    /// Remove sessions past their TTL
    pub fn evict_expired_sessions(&self) -> usize {
        self.sessions.evict_expired()
    }

    /// Orchestrator and per-agent health
    pub fn health(&self) -> HealthReport {
        let names = self.registry.list();
        let stats = self.metrics.agents();
        let agents = names
            .iter()
            .map(|name| {
                let s = stats.get(name).copied().unwrap_or_default();
                // An agent that has only ever failed is reported unhealthy
                let healthy = s.total() == 0 || s.successes > 0;
                (name.clone(), AgentHealth { healthy, stats: s })
            })
            .collect();

        HealthReport {
            orchestrator: OrchestratorHealth {
                healthy: true,
                registered_agent_count: names.len(),
            },
            agents,
        }
    }

    /// Registered agents with their roles and capabilities
    pub fn agents(&self) -> AgentsReport {
        let details = self
            .registry
            .descriptors()
            .into_iter()
            .map(|(name, d)| {
                (
                    name,
                    AgentDetail {
                        role: d.role,
                        capabilities: d.capabilities,
                    },
                )
            })
            .collect();

        AgentsReport {
            agents: self.registry.list(),
            details,
        }
    }

    /// Query and per-agent counters
    pub fn metrics(&self) -> MetricsReport {
        let q = self.metrics.queries();
        MetricsReport {
            orchestrator: OrchestratorMetrics {
                queries: q.queries,
                last_latency_ms: q.last_latency_ms,
                avg_latency_ms: q.avg_latency_ms,
                total_succeeded: q.total_succeeded,
                total_failed: q.total_failed,
                registered_agent_count: self.registry.len(),
                active_sessions: self.sessions.len(),
            },
            agents: self.metrics.agents(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Explicit construction of an [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Option<Arc<AgentRegistry>>,
    decomposer: Option<Arc<dyn Decomposer>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    config: Option<OrchestratorConfig>,
}

impl OrchestratorBuilder {
    pub fn registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn decomposer(mut self, decomposer: impl Decomposer + 'static) -> Self {
        self.decomposer = Some(Arc::new(decomposer));
        self
    }

    pub fn synthesizer(mut self, synthesizer: impl Synthesizer + 'static) -> Self {
        self.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = self.registry.unwrap_or_default();
        let metrics = Arc::new(Metrics::new());
        let decomposer = self.decomposer.unwrap_or_else(|| {
            Arc::new(KeywordDecomposer::personality_default(config.fallback_agent.clone()))
        });
        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Arc::new(SummarySynthesizer::new()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            DispatchPolicy::from(&config),
        );

        info!(
            agents = registry.len(),
            max_parallel = config.max_parallel_agents,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            registry,
            decomposer,
            synthesizer,
            dispatcher,
            sessions: SessionStore::new(config.session_ttl),
            metrics,
            config,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorHealth {
    pub healthy: bool,
    pub registered_agent_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub healthy: bool,
    #[serde(flatten)]
    pub stats: AgentStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub orchestrator: OrchestratorHealth,
    pub agents: BTreeMap<String, AgentHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentDetail {
    pub role: String,
    pub capabilities: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentsReport {
    pub agents: Vec<String>,
    pub details: BTreeMap<String, AgentDetail>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMetrics {
    pub queries: u64,
    pub last_latency_ms: u64,
    pub avg_latency_ms: f64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub registered_agent_count: usize,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub orchestrator: OrchestratorMetrics,
    pub agents: BTreeMap<String, AgentStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposer::StaticDecomposer;
    use crate::error::AgentError;
    use crate::test_agents::MockAgent;
    use crate::types::{FailureKind, ResultStatus, Subtask};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config(max_parallel: usize, timeout_ms: u64, retries: u32) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_parallel_agents(max_parallel)
            .with_agent_timeout(Duration::from_millis(timeout_ms))
            .with_max_retries(retries)
    }

    fn orchestrator(
        registry: AgentRegistry,
        plan: Vec<Subtask>,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator::builder()
            .registry(Arc::new(registry))
            .decomposer(StaticDecomposer::new(plan))
            .config(config)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Orchestrator::builder()
            .config(OrchestratorConfig::default().with_max_parallel_agents(0))
            .build();
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    // Scenario A
    #[tokio::test]
    async fn test_single_subtask_success() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::ok("general", Duration::from_millis(10)));
        let orch = orchestrator(
            registry,
            vec![Subtask::new("a", "general", json!({}))],
            config(4, 1000, 0),
        );

        let response = orch.process_query(Query::new("hello")).await.unwrap();
        assert_eq!(response.succeeded_count, 1);
        assert_eq!(response.failed_count, 0);
        assert_eq!(response.summary, "[general] general answered");
        assert!(response.latency_ms >= 10);
    }

    // Scenario B
    #[tokio::test]
    async fn test_single_slot_serializes() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::ok("a", Duration::from_millis(50)));
        registry.register(MockAgent::ok("b", Duration::from_millis(10)));
        let orch = orchestrator(
            registry,
            vec![
                Subtask::new("1", "a", json!({})),
                Subtask::new("2", "b", json!({})),
            ],
            config(1, 1000, 0),
        );

        let response = orch.process_query(Query::new("both")).await.unwrap();
        assert_eq!(response.succeeded_count, 2);
        assert!(response.latency_ms >= 60);
    }

    // Scenario C
    #[tokio::test]
    async fn test_timeout_after_retry() {
        let registry = AgentRegistry::new();
        let agent = MockAgent::ok("slow", Duration::from_millis(500));
        let calls = agent.calls.clone();
        registry.register(agent);
        let orch = orchestrator(
            registry,
            vec![Subtask::new("a", "slow", json!({}))],
            config(4, 100, 1),
        );

        let response = orch.process_query(Query::new("slow")).await.unwrap();
        let result = &response.results[0];
        assert_eq!(result.status, ResultStatus::Timeout);
        assert_eq!(result.attempt, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(response.failed_count, 1);
        assert_eq!(orch.metrics().agents["slow"].timeouts, 1);
    }

    // Scenario D
    #[tokio::test]
    async fn test_dependency_failure_cascades() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::failing("a", AgentError::internal("boom")));
        let b = MockAgent::ok("b", Duration::ZERO);
        let b_calls = b.calls.clone();
        registry.register(b);
        let orch = orchestrator(
            registry,
            vec![
                Subtask::new("A", "a", json!({})),
                Subtask::new("B", "b", json!({})).depends_on("A"),
            ],
            config(4, 1000, 1),
        );

        let response = orch.process_query(Query::new("chain")).await.unwrap();
        assert_eq!(response.results[0].failure_kind(), Some(FailureKind::InternalError));
        assert_eq!(response.results[1].failure_kind(), Some(FailureKind::DependencyFailed));
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.summary, "No agent could answer \"chain\".");
    }

    // Scenario E
    #[tokio::test]
    async fn test_empty_decomposition() {
        let orch = orchestrator(AgentRegistry::new(), vec![], config(4, 1000, 0));

        let response = orch.process_query(Query::new("anything")).await.unwrap();
        assert_eq!(response.succeeded_count, 0);
        assert_eq!(response.failed_count, 0);
        assert!(!response.summary.is_empty());
    }

    #[tokio::test]
    async fn test_cyclic_decomposition_is_error() {
        let orch = orchestrator(
            AgentRegistry::new(),
            vec![Subtask::new("a", "x", json!({})).depends_on("a")],
            config(4, 1000, 0),
        );
        let err = orch.process_query(Query::new("loop")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CyclicPlan(_)));
    }

    #[tokio::test]
    async fn test_context_reaches_agents() {
        let registry = AgentRegistry::new();
        registry.register(crate::agent::FnAgent::new(
            crate::agent::AgentDescriptor::new("general"),
            |_input, ctx: crate::agent::AgentContext| {
                let events = ctx.context().get("events").cloned();
                async move {
                    Ok::<_, AgentError>(json!({
                        "summary": format!("events: {}", events.unwrap_or_default()),
                    }))
                }
            },
        ));
        let orch = orchestrator(
            registry,
            vec![Subtask::new("a", "general", json!({}))],
            config(4, 1000, 0),
        );

        let mut context = Context::new();
        context.insert("events".into(), json!(["standup"]));
        let response = orch
            .process_query(Query::new("what's on").with_context(context))
            .await
            .unwrap();
        assert_eq!(response.summary, "[general] events: [\"standup\"]");
    }

    // === Session Tests ===

    #[tokio::test]
    async fn test_session_records_latest_exchange() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::ok("general", Duration::ZERO));
        let orch = orchestrator(
            registry,
            vec![Subtask::new("a", "general", json!({}))],
            config(4, 1000, 0),
        );

        orch.process_query(Query::new("first").with_session("s1")).await.unwrap();
        orch.process_query(Query::new("second").with_session("s1")).await.unwrap();

        let session = orch.session(&"s1".into()).unwrap();
        assert_eq!(session.last_query, "second");
        assert_eq!(session.last_decomposition.len(), 1);
        assert_eq!(session.last_response.succeeded_count, 1);

        assert!(orch.delete_session(&"s1".into()));
        assert!(matches!(
            orch.session(&"s1".into()),
            Err(OrchestratorError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_session_without_id() {
        let orch = orchestrator(AgentRegistry::new(), vec![], config(4, 1000, 0));
        orch.process_query(Query::new("anon")).await.unwrap();
        assert_eq!(orch.metrics().orchestrator.active_sessions, 0);
    }

    // === Default Pipeline Tests ===

    #[tokio::test]
    async fn test_recommend_uses_default_decomposer() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(MockAgent::ok("recommender", Duration::ZERO));
        let orch = Orchestrator::builder()
            .registry(Arc::clone(&registry))
            .build()
            .unwrap();

        let response = orch
            .recommend("music", Context::new(), Some("s9".into()))
            .await
            .unwrap();
        assert_eq!(response.query, "recommend music for me");
        assert_eq!(response.succeeded_count, 1);
        assert_eq!(response.results[0].agent_name, "recommender");
        assert!(orch.session(&"s9".into()).is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_fallback_is_unknown_agent() {
        let orch = Orchestrator::builder().build().unwrap();
        let response = orch.process_query(Query::new("hello")).await.unwrap();

        assert_eq!(response.failed_count, 1);
        assert_eq!(response.results[0].failure_kind(), Some(FailureKind::UnknownAgent));
        assert_eq!(response.results[0].agent_name, "general");
    }

    // === Reporting Tests ===

    #[tokio::test]
    async fn test_health_agents_and_metrics() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::ok("good", Duration::ZERO));
        registry.register(MockAgent::failing("bad", AgentError::internal("x")));
        let orch = orchestrator(
            registry,
            vec![
                Subtask::new("1", "good", json!({})),
                Subtask::new("2", "bad", json!({})),
            ],
            config(4, 1000, 0),
        );
        orch.process_query(Query::new("go")).await.unwrap();

        let health = orch.health();
        assert!(health.orchestrator.healthy);
        assert_eq!(health.orchestrator.registered_agent_count, 2);
        assert!(health.agents["good"].healthy);
        assert!(!health.agents["bad"].healthy);

        let agents = orch.agents();
        assert_eq!(agents.agents, vec!["bad", "good"]);
        assert_eq!(agents.details["good"].role, "specialist");
        assert!(agents.details["good"].capabilities.contains("mock"));

        let metrics = orch.metrics();
        assert_eq!(metrics.orchestrator.queries, 1);
        assert_eq!(metrics.orchestrator.total_succeeded, 1);
        assert_eq!(metrics.orchestrator.total_failed, 1);
        assert_eq!(metrics.agents["good"].successes, 1);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["orchestrator"]["registeredAgentCount"], 2);
        assert_eq!(json["agents"]["bad"]["failures"], 1);
    }

    #[tokio::test]
    async fn test_cancelled_query_still_responds() {
        let registry = AgentRegistry::new();
        registry.register(MockAgent::ok("slow", Duration::from_millis(500)));
        let orch = orchestrator(
            registry,
            vec![Subtask::new("a", "slow", json!({}))],
            config(4, 5000, 0),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = orch
            .process_query_with_cancel(Query::new("never mind"), cancel)
            .await
            .unwrap();
        assert_eq!(response.results[0].failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(response.results[0].attempt, 0);
    }
}
