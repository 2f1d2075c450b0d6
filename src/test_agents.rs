//! Scriptable agents for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentContext, AgentDescriptor, AgentInput};
use crate::error::AgentError;

#[derive(Clone)]
enum Behavior {
    Succeed,
    /// Fail with the error on the first `n` calls, then succeed
    FailFirst(usize, AgentError),
    Panic,
    /// Wait for the attempt token
    Cooperative,
}

pub(crate) struct MockAgent {
    name: String,
    delay: Duration,
    behavior: Behavior,
    pub calls: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub seen_tokens: Arc<Mutex<Vec<CancellationToken>>>,
    in_flight: Arc<AtomicUsize>,
}

impl MockAgent {
    fn new(name: &str, delay: Duration, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            delay,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            seen_tokens: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ok(name: &str, delay: Duration) -> Self {
        Self::new(name, delay, Behavior::Succeed)
    }

    pub fn failing(name: &str, error: AgentError) -> Self {
        Self::new(name, Duration::ZERO, Behavior::FailFirst(usize::MAX, error))
    }

    /// Upstream failures for the first `failures` calls
    pub fn flaky(name: &str, failures: usize) -> Self {
        Self::new(
            name,
            Duration::ZERO,
            Behavior::FailFirst(failures, AgentError::upstream("service unavailable")),
        )
    }

    pub fn panicking(name: &str) -> Self {
        Self::new(name, Duration::ZERO, Behavior::Panic)
    }

    pub fn cooperative(name: &str) -> Self {
        Self::new(name, Duration::ZERO, Behavior::Cooperative)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::new(self.name.clone()).with_capability("mock")
    }

    async fn execute(&self, input: AgentInput, ctx: AgentContext) -> Result<Value, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::FailFirst(n, err) => {
                if call < *n {
                    return Err(err.clone());
                }
            }
            Behavior::Panic => panic!("{} exploded", self.name),
            Behavior::Cooperative => {
                self.seen_tokens.lock().push(ctx.cancellation().clone());
                ctx.cancellation().cancelled().await;
                return Err(AgentError::internal("stopped"));
            }
        }

        Ok(json!({
            "agent": self.name,
            "summary": format!("{} answered", self.name),
            "attempt": ctx.attempt,
            "dependencies": input.dependencies.len(),
        }))
    }
}
