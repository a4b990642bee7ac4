//! Process-local checkpoint store.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_core::{Checkpoint, ConversationState, ThreadId};
use tracing::{instrument, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::StoreError;

/// Checkpoints kept in a concurrent map. Each thread's entry is locked only
/// for the duration of one compare-and-swap.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    threads: DashMap<ThreadId, Checkpoint>,
}

impl InMemoryCheckpointStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored threads.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no thread was stored yet.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.threads.get(thread_id).map(|cp| cp.value().clone()))
    }

    #[instrument(skip(self, state), fields(thread_id = %state.thread_id()))]
    fn put(
        &self,
        state: &ConversationState,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        match self.threads.entry(state.thread_id().clone()) {
            Entry::Occupied(mut entry) => {
                let found = entry.get().version;
                if expected_version != Some(found) {
                    warn!(?expected_version, found, "checkpoint version conflict");
                    return Err(StoreError::Conflict {
                        expected: expected_version,
                        found: Some(found),
                    });
                }
                let version = found + 1;
                let _ = entry.insert(Checkpoint {
                    state: state.clone(),
                    version,
                });
                Ok(version)
            }
            Entry::Vacant(entry) => {
                if expected_version.is_some() {
                    warn!(?expected_version, "checkpoint vanished");
                    return Err(StoreError::Conflict {
                        expected: expected_version,
                        found: None,
                    });
                }
                let _ = entry.insert(Checkpoint {
                    state: state.clone(),
                    version: 1,
                });
                Ok(1)
            }
        }
    }
}
