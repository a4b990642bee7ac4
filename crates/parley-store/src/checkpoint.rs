//! The checkpoint persistence contract.

use parley_core::{Checkpoint, ConversationState, ThreadId};

use crate::error::StoreError;

/// Durable per-thread checkpoints with compare-and-swap writes.
///
/// Implementations must never leave a partial write: either the whole new
/// state is visible under the new version or nothing changed.
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint of a thread, if it exists.
    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError>;

    /// Replace the checkpoint of `state.thread_id()`.
    ///
    /// `expected_version` is the version the caller last read, or `None` if
    /// the caller believes the thread does not exist yet. On mismatch the
    /// write is rejected with [`StoreError::Conflict`]. Returns the new
    /// version (1 for the first write).
    fn put(
        &self,
        state: &ConversationState,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;
}
