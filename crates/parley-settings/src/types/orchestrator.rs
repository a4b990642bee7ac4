use parley_core::AgentRole;
use serde::{Deserialize, Serialize};

/// Turn-taking and runtime limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Speaking order. Entry `i` takes turn `i`.
    pub queue: Vec<AgentRole>,
    /// Turns after which the conversation terminates. Must not exceed the
    /// queue length.
    pub max_turns: u32,
    /// Per-invocation agent timeout. `0` (or `None`) waits indefinitely.
    pub agent_timeout_ms: Option<u64>,
    /// Orchestrators kept by the registry before evicting the least
    /// recently used one.
    pub registry_capacity: usize,
}

/// Speaking order of the discovery meeting: three rounds of
/// customer, frontend, analyst, frontend, analyst.
pub fn discovery_queue() -> Vec<AgentRole> {
    use AgentRole::{BusinessAnalyst as Ba, Customer, FrontendDeveloper as Fe};
    [Customer, Fe, Ba, Fe, Ba].repeat(3)
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            queue: discovery_queue(),
            max_turns: 6,
            agent_timeout_ms: Some(120_000),
            registry_capacity: 16,
        }
    }
}
