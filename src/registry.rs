//! Agent registry - name to agent lookup

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::agent::{Agent, AgentDescriptor, AgentHandle};
use crate::error::OrchestratorError;

struct RegisteredAgent {
    descriptor: AgentDescriptor,
    handle: AgentHandle,
}

/// Maps agent names to agents.
///
/// Read-heavy: dispatches resolve concurrently under a shared lock, writes
/// happen at startup or on hot reload. Re-registering a name replaces the
/// previous agent.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its descriptor name
    pub fn register(&self, agent: impl Agent + 'static) {
        let handle = AgentHandle::new(agent);
        let name = handle.name();
        self.register_as(name, handle);
    }

    /// Register an agent under an explicit name (upsert)
    pub fn register_as(&self, name: impl Into<String>, handle: AgentHandle) {
        let name = name.into();
        let mut descriptor = handle.descriptor();
        descriptor.name = name.clone();

        let replaced = self
            .agents
            .write()
            .insert(name.clone(), RegisteredAgent { descriptor, handle })
            .is_some();

        if replaced {
            debug!(agent = %name, "Replaced registered agent");
        } else {
            info!(agent = %name, "Registered agent");
        }
    }

    /// Look up an agent by name
    pub fn resolve(&self, name: &str) -> Result<AgentHandle, OrchestratorError> {
        self.agents
            .read()
            .get(name)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| OrchestratorError::AgentNotFound(name.to_string()))
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors keyed by name
    pub fn descriptors(&self) -> BTreeMap<String, AgentDescriptor> {
        self.agents
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.descriptor.clone()))
            .collect()
    }

    /// Unregister an agent, returning whether it was present
    pub fn remove(&self, name: &str) -> bool {
        self.agents.write().remove(name).is_some()
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}
