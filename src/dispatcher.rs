//! Dispatcher - runs a subtask DAG under concurrency, timeout and retry policy

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::agent::{AgentContext, AgentHandle, AgentInput};
use crate::config::OrchestratorConfig;
use crate::error::{AgentError, OrchestratorError};
use crate::metrics::Metrics;
use crate::plan::ExecutionPlan;
use crate::registry::AgentRegistry;
use crate::types::{AgentResult, FailureKind, SharedContext, Subtask, SubtaskId};

/// Limits applied to one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Agent calls in flight at once within one dispatch
    pub max_parallel_agents: usize,
    /// Limit for a single attempt
    pub agent_timeout: Duration,
    /// Extra attempts after a timeout or upstream failure
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_backoff: Duration,
    /// Limit for the whole dispatch
    pub query_deadline: Option<Duration>,
}

impl From<&OrchestratorConfig> for DispatchPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_parallel_agents: config.max_parallel_agents.max(1),
            agent_timeout: config.agent_timeout,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            query_deadline: config.query_deadline,
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

/// Executes subtask plans against the agent registry.
///
/// Every subtask ends with exactly one terminal [`AgentResult`]; agent
/// failures are data, never errors. Only an invalid plan (duplicate ids,
/// dangling or cyclic dependencies) fails the dispatch as a whole.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    metrics: Arc<Metrics>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    /// Create a dispatcher. `max_parallel_agents` is clamped to what a
    /// semaphore can hold, and to at least one slot.
    pub fn new(
        registry: Arc<AgentRegistry>,
        metrics: Arc<Metrics>,
        mut policy: DispatchPolicy,
    ) -> Self {
        policy.max_parallel_agents = policy
            .max_parallel_agents
            .clamp(1, Semaphore::MAX_PERMITS);
        Self {
            registry,
            metrics,
            policy,
        }
    }

    /// Effective limits
    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Run every subtask to a terminal result.
    ///
    /// Results come back in the order of `subtasks`. Cancelling `cancel`
    /// (or hitting the query deadline) resolves everything still pending
    /// as [`FailureKind::Cancelled`].
    #[instrument(skip_all, fields(subtasks = subtasks.len()))]
    pub async fn dispatch(
        &self,
        subtasks: &[Subtask],
        context: SharedContext,
        cancel: CancellationToken,
    ) -> Result<Vec<AgentResult>, OrchestratorError> {
        let plan = ExecutionPlan::new(subtasks)?;
        let by_id: HashMap<&SubtaskId, &Subtask> = subtasks.iter().map(|s| (&s.id, s)).collect();

        let cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.policy.max_parallel_agents));
        let deadline = self.policy.query_deadline.map(|d| Instant::now() + d);

        let mut unmet: HashMap<SubtaskId, usize> = subtasks
            .iter()
            .map(|s| (s.id.clone(), plan.dependencies(&s.id).len()))
            .collect();
        let mut ready: VecDeque<SubtaskId> = plan.roots().into();
        let mut results: HashMap<SubtaskId, AgentResult> = HashMap::with_capacity(subtasks.len());
        let mut running = Runners::default();

        info!(
            max_parallel = self.policy.max_parallel_agents,
            timeout_ms = self.policy.agent_timeout.as_millis() as u64,
            max_retries = self.policy.max_retries,
            "Starting dispatch"
        );

        loop {
            while let Some(id) = ready.pop_front() {
                let Some(subtask) = by_id.get(&id).copied() else {
                    continue;
                };

                if let Some(immediate) = self.admit(subtask, &plan, &results, &cancel) {
                    self.resolve(immediate, &plan, &mut unmet, &mut ready, &mut results);
                    continue;
                }

                let agent = match self.registry.resolve(&subtask.agent_name) {
                    Ok(agent) => agent,
                    Err(e) => {
                        warn!(subtask = %subtask.id, agent = %subtask.agent_name, "Unknown agent");
                        let result = AgentResult::failure(
                            subtask,
                            FailureKind::UnknownAgent,
                            e.to_string(),
                            0,
                            0,
                        );
                        self.resolve(result, &plan, &mut unmet, &mut ready, &mut results);
                        continue;
                    }
                };

                let input = AgentInput {
                    payload: subtask.input.clone(),
                    dependencies: plan
                        .dependencies(&subtask.id)
                        .iter()
                        .filter_map(|dep| {
                            let payload = results.get(dep)?.payload.clone()?;
                            Some((dep.clone(), payload))
                        })
                        .collect(),
                };

                let runner = run_subtask(
                    subtask.clone(),
                    agent,
                    input,
                    Arc::clone(&context),
                    Arc::clone(&semaphore),
                    self.policy,
                    cancel.clone(),
                );
                running.spawn(subtask.id.clone(), runner);
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Joined::Finished(result)) => {
                        self.resolve(result, &plan, &mut unmet, &mut ready, &mut results);
                    }
                    Some(Joined::Lost(id, e)) => {
                        error!(subtask = ?id, error = %e, "Subtask runner failed");
                        if let Some(subtask) = id.as_ref().and_then(|id| by_id.get(id).copied()) {
                            let result = AgentResult::failure(
                                subtask,
                                FailureKind::InternalError,
                                format!("subtask runner failed: {e}"),
                                0,
                                0,
                            );
                            self.resolve(result, &plan, &mut unmet, &mut ready, &mut results);
                        }
                    }
                    None => break,
                },
                _ = wait_until(deadline), if !cancel.is_cancelled() => {
                    warn!("Query deadline exceeded, cancelling outstanding subtasks");
                    cancel.cancel();
                }
            }
        }

        let ordered = subtasks
            .iter()
            .map(|s| {
                results.remove(&s.id).unwrap_or_else(|| {
                    error!(subtask = %s.id, "Subtask never reached a terminal state");
                    AgentResult::failure(
                        s,
                        FailureKind::InternalError,
                        "subtask was lost by the dispatcher",
                        0,
                        0,
                    )
                })
            })
            .collect::<Vec<_>>();

        let succeeded = ordered.iter().filter(|r| r.is_success()).count();
        info!(
            succeeded,
            failed = ordered.len() - succeeded,
            "Dispatch complete"
        );

        Ok(ordered)
    }

    /// Result for a subtask that must not run: a dependency did not
    /// succeed, or the dispatch has been cancelled.
    fn admit(
        &self,
        subtask: &Subtask,
        plan: &ExecutionPlan,
        results: &HashMap<SubtaskId, AgentResult>,
        cancel: &CancellationToken,
    ) -> Option<AgentResult> {
        let failed_dep = plan
            .dependencies(&subtask.id)
            .iter()
            .find(|dep| !results.get(*dep).map(AgentResult::is_success).unwrap_or(false));

        if let Some(dep) = failed_dep {
            debug!(subtask = %subtask.id, dependency = %dep, "Dependency failed, skipping");
            return Some(AgentResult::failure(
                subtask,
                FailureKind::DependencyFailed,
                format!("dependency {dep} did not succeed"),
                0,
                0,
            ));
        }

        if cancel.is_cancelled() {
            return Some(AgentResult::failure(
                subtask,
                FailureKind::Cancelled,
                "query cancelled before subtask started",
                0,
                0,
            ));
        }

        None
    }

    /// Record a terminal result and release dependents whose dependencies
    /// have all resolved.
    fn resolve(
        &self,
        result: AgentResult,
        plan: &ExecutionPlan,
        unmet: &mut HashMap<SubtaskId, usize>,
        ready: &mut VecDeque<SubtaskId>,
        results: &mut HashMap<SubtaskId, AgentResult>,
    ) {
        self.metrics.record_result(&result);
        let id = result.subtask_id.clone();
        results.insert(id.clone(), result);

        for dependent in plan.dependents(&id) {
            if let Some(count) = unmet.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.push_back(dependent.clone());
                }
            }
        }
    }
}

/// Subtask runners in flight, keyed by task id so a runner that dies can
/// still be resolved against its subtask.
#[derive(Default)]
struct Runners {
    tasks: JoinSet<AgentResult>,
    subtasks: HashMap<task::Id, SubtaskId>,
}

enum Joined {
    Finished(AgentResult),
    Lost(Option<SubtaskId>, JoinError),
}

impl Runners {
    fn spawn<F>(&mut self, subtask: SubtaskId, runner: F)
    where
        F: Future<Output = AgentResult> + Send + 'static,
    {
        let handle = self.tasks.spawn(runner);
        self.subtasks.insert(handle.id(), subtask);
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    async fn join_next(&mut self) -> Option<Joined> {
        let joined = match self.tasks.join_next_with_id().await? {
            Ok((id, result)) => {
                self.subtasks.remove(&id);
                Joined::Finished(result)
            }
            Err(e) => Joined::Lost(self.subtasks.remove(&e.id()), e),
        };
        Some(joined)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

enum AttemptOutcome {
    Finished(Result<Result<Value, AgentError>, JoinError>),
    TimedOut,
    Cancelled,
}

/// Drive one subtask through its attempts.
///
/// A concurrency permit is held only while the agent call is in flight.
/// On timeout the attempt's token is cancelled and its task aborted, so
/// the call is abandoned at its next await point; a retry is a fresh call.
async fn run_subtask(
    subtask: Subtask,
    agent: AgentHandle,
    input: AgentInput,
    context: SharedContext,
    semaphore: Arc<Semaphore>,
    policy: DispatchPolicy,
    cancel: CancellationToken,
) -> AgentResult {
    let started = Instant::now();
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return cancelled(&subtask, started, attempt);
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    return AgentResult::failure(
                        &subtask,
                        FailureKind::InternalError,
                        e.to_string(),
                        elapsed_ms(started),
                        attempt,
                    );
                }
            },
        };

        attempt += 1;
        let attempt_token = cancel.child_token();
        let ctx = AgentContext::new(
            subtask.id.clone(),
            attempt,
            Arc::clone(&context),
            attempt_token.clone(),
        );
        debug!(subtask = %subtask.id, agent = %subtask.agent_name, attempt, "Invoking agent");

        let call_agent = agent.clone();
        let call_input = input.clone();
        let mut call = tokio::spawn(async move { call_agent.execute(call_input, ctx).await });

        let outcome = tokio::select! {
            joined = &mut call => AttemptOutcome::Finished(joined),
            _ = tokio::time::sleep(policy.agent_timeout) => AttemptOutcome::TimedOut,
            _ = cancel.cancelled() => AttemptOutcome::Cancelled,
        };

        if !matches!(outcome, AttemptOutcome::Finished(_)) {
            attempt_token.cancel();
            call.abort();
        }
        drop(permit);

        let retry = match outcome {
            AttemptOutcome::Finished(Ok(Ok(payload))) => {
                debug!(subtask = %subtask.id, attempt, "Agent succeeded");
                return AgentResult::success(&subtask, payload, elapsed_ms(started), attempt);
            }
            AttemptOutcome::Finished(Ok(Err(err))) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    warn!(
                        subtask = %subtask.id,
                        agent = %subtask.agent_name,
                        attempt,
                        error = %err,
                        "Agent failed"
                    );
                    return AgentResult::failure(
                        &subtask,
                        err.kind(),
                        err.to_string(),
                        elapsed_ms(started),
                        attempt,
                    );
                }
                err.to_string()
            }
            AttemptOutcome::Finished(Err(join_err)) => {
                error!(
                    subtask = %subtask.id,
                    agent = %subtask.agent_name,
                    error = %join_err,
                    "Agent call panicked"
                );
                return AgentResult::failure(
                    &subtask,
                    FailureKind::InternalError,
                    format!("agent call aborted: {join_err}"),
                    elapsed_ms(started),
                    attempt,
                );
            }
            AttemptOutcome::TimedOut => {
                let message = format!("no result within {}ms", policy.agent_timeout.as_millis());
                if attempt >= max_attempts {
                    warn!(subtask = %subtask.id, agent = %subtask.agent_name, attempt, "Agent timed out");
                    return AgentResult::failure(
                        &subtask,
                        FailureKind::Timeout,
                        message,
                        elapsed_ms(started),
                        attempt,
                    );
                }
                message
            }
            AttemptOutcome::Cancelled => {
                return cancelled(&subtask, started, attempt);
            }
        };

        warn!(
            subtask = %subtask.id,
            agent = %subtask.agent_name,
            attempt,
            reason = %retry,
            "Retrying subtask"
        );

        if !policy.retry_backoff.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return cancelled(&subtask, started, attempt),
                _ = tokio::time::sleep(policy.retry_backoff) => {}
            }
        }
    }
}

fn cancelled(subtask: &Subtask, started: Instant, attempt: u32) -> AgentResult {
    AgentResult::failure(
        subtask,
        FailureKind::Cancelled,
        "query cancelled",
        elapsed_ms(started),
        attempt,
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
