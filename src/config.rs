//! Orchestrator configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::OrchestratorError;

const DEFAULT_MAX_PARALLEL_AGENTS: usize = 4;
const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_FALLBACK_AGENT: &str = "general";

/// Concurrency, timeout and retry policy for the orchestrator.
///
/// Durations are expressed in milliseconds in TOML (`agent_timeout_ms`,
/// `retry_backoff_ms`, `query_deadline_ms`) except the session TTL, which
/// is in seconds (`session_ttl_secs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum agent calls in flight per query
    pub max_parallel_agents: usize,

    /// Budget for a single agent attempt
    #[serde(rename = "agent_timeout_ms", with = "millis")]
    pub agent_timeout: Duration,

    /// Extra attempts after a timeout or upstream failure
    pub max_retries: u32,

    /// Delay before a retry attempt
    #[serde(rename = "retry_backoff_ms", with = "millis")]
    pub retry_backoff: Duration,

    /// Wall-clock bound for a whole dispatch
    #[serde(rename = "query_deadline_ms", with = "opt_millis")]
    pub query_deadline: Option<Duration>,

    /// Sessions untouched for longer than this are treated as gone
    #[serde(rename = "session_ttl_secs", with = "opt_secs")]
    pub session_ttl: Option<Duration>,

    /// Agent used when a query matches nothing
    pub fallback_agent: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: DEFAULT_MAX_PARALLEL_AGENTS,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::ZERO,
            query_deadline: None,
            session_ttl: None,
            fallback_agent: DEFAULT_FALLBACK_AGENT.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, OrchestratorError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by `COUNCIL_*` environment variables
    pub fn from_env() -> Result<Self, OrchestratorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, OrchestratorError> {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize>(&lookup, "COUNCIL_MAX_PARALLEL_AGENTS")? {
            config.max_parallel_agents = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "COUNCIL_AGENT_TIMEOUT_MS")? {
            config.agent_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32>(&lookup, "COUNCIL_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "COUNCIL_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "COUNCIL_QUERY_DEADLINE_MS")? {
            config.query_deadline = Some(Duration::from_millis(v));
        }
        if let Some(v) = parse_var::<u64>(&lookup, "COUNCIL_SESSION_TTL_SECS")? {
            config.session_ttl = Some(Duration::from_secs(v));
        }
        if let Some(v) = lookup("COUNCIL_FALLBACK_AGENT") {
            config.fallback_agent = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot honor
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_parallel_agents == 0 {
            return Err(OrchestratorError::Config(
                "max_parallel_agents must be at least 1".into(),
            ));
        }
        if self.max_parallel_agents > Semaphore::MAX_PERMITS {
            return Err(OrchestratorError::Config(format!(
                "max_parallel_agents must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.agent_timeout.is_zero() {
            return Err(OrchestratorError::Config(
                "agent_timeout must be greater than zero".into(),
            ));
        }
        if self.fallback_agent.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "fallback_agent must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn with_max_parallel_agents(mut self, n: usize) -> Self {
        self.max_parallel_agents = n;
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_query_deadline(mut self, deadline: Duration) -> Self {
        self.query_deadline = Some(deadline);
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, OrchestratorError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| OrchestratorError::Config(format!("{key}={raw}: {e}"))),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_secs))
    }
}
