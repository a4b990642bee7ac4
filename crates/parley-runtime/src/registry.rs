//! Memoized orchestrators keyed by conversation configuration.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::AgentRole;
use parley_settings::ParleySettings;
use parley_store::CheckpointStore;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::agent::{Agent, CompletionBackend, Persona, PersonaAgent};
use crate::errors::OrchestratorError;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::router::RouterPolicy;

/// Everything that distinguishes one conversation setup from another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    /// What the customer wants built.
    pub product_brief: String,
    /// Speaking order.
    pub queue: Vec<AgentRole>,
    /// Turn limit per conversation.
    pub max_turns: u32,
}

impl ConversationConfig {
    /// Configuration described by the loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            product_brief: settings.conversation.product_brief.clone(),
            queue: settings.orchestrator.queue.clone(),
            max_turns: settings.orchestrator.max_turns,
        }
    }

    /// Registry key: the first 12 hex characters of a sha256 over the brief
    /// and the policy.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.product_brief.as_bytes());
        hasher.update([0u8]);
        for role in &self.queue {
            hasher.update(role.tag().as_bytes());
            hasher.update([b',']);
        }
        hasher.update(self.max_turns.to_le_bytes());

        let mut key = String::with_capacity(12);
        for byte in &hasher.finalize()[..6] {
            let _ = write!(key, "{byte:02x}");
        }
        key
    }
}

/// Wire persona agents for `config` over `backend`.
pub fn build_orchestrator<B: CompletionBackend + 'static>(
    backend: Arc<B>,
    store: Arc<dyn CheckpointStore>,
    config: &ConversationConfig,
    orchestrator_config: OrchestratorConfig,
) -> Result<Orchestrator, OrchestratorError> {
    let router = RouterPolicy::new(config.queue.clone(), config.max_turns)?;
    let agents: Vec<Arc<dyn Agent>> = Persona::discovery_panel(&config.product_brief)
        .into_iter()
        .map(|persona| Arc::new(PersonaAgent::new(persona, Arc::clone(&backend))) as Arc<dyn Agent>)
        .collect();
    Orchestrator::new(Arc::new(router), agents, store, orchestrator_config)
}

#[derive(Default)]
struct Lru {
    entries: HashMap<String, Arc<Orchestrator>>,
    // Front is least recently used.
    order: VecDeque<String>,
}

impl Lru {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Bounded least-recently-used cache of orchestrators.
pub struct OrchestratorRegistry {
    capacity: usize,
    inner: Mutex<Lru>,
}

impl OrchestratorRegistry {
    /// Registry holding at most `capacity` orchestrators (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Lru::default()),
        }
    }

    /// Cached orchestrator for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Orchestrator>> {
        let mut lru = self.inner.lock();
        let found = lru.entries.get(key).cloned();
        if found.is_some() {
            lru.touch(key);
        }
        found
    }

    /// Cached orchestrator for `key`, building it with `build` on a miss.
    /// A full registry evicts its least recently used entry first.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<Orchestrator, E>,
    ) -> Result<Arc<Orchestrator>, E> {
        let mut lru = self.inner.lock();
        if let Some(hit) = lru.entries.get(key).cloned() {
            lru.touch(key);
            return Ok(hit);
        }

        let built = Arc::new(build()?);
        while lru.entries.len() >= self.capacity {
            let Some(evicted) = lru.order.pop_front() else {
                break;
            };
            let _ = lru.entries.remove(&evicted);
            debug!(key = %evicted, "evicted orchestrator");
        }
        let _ = lru.entries.insert(key.to_string(), Arc::clone(&built));
        lru.order.push_back(key.to_string());
        debug!(key, "cached orchestrator");
        Ok(built)
    }

    /// Cached orchestrator for `config`, wiring persona agents on a miss.
    pub fn get_or_build<B: CompletionBackend + 'static>(
        &self,
        config: &ConversationConfig,
        backend: Arc<B>,
        store: Arc<dyn CheckpointStore>,
        orchestrator_config: OrchestratorConfig,
    ) -> Result<Arc<Orchestrator>, OrchestratorError> {
        self.get_or_try_insert_with(&config.key(), || {
            build_orchestrator(backend, store, config, orchestrator_config)
        })
    }

    /// Whether `key` is cached; does not affect recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Cached orchestrators.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached orchestrators.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
