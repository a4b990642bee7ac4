//! Integrity errors for conversation state.
//!
//! These are raised when a message sequence or turn counter does not satisfy
//! the thread invariants, typically because a persisted checkpoint was
//! corrupted or hand-edited. The runtime maps them to `InvalidState`.

use thiserror::Error;

/// A conversation state failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StateError {
    /// Sequence ids are not gap-free from 0.
    #[error("sequence gap: expected id {expected}, found {found}")]
    SequenceGap {
        /// Id the next message should have carried.
        expected: u64,
        /// Id it actually carried.
        found: u64,
    },

    /// `turn_index` disagrees with the agent messages of the current epoch.
    #[error(
        "turn counter {turn_index} does not match {agent_messages} agent messages since sequence {epoch_start}"
    )]
    TurnCounterMismatch {
        /// Stored turn counter.
        turn_index: u32,
        /// Agent messages at or after `epoch_start`.
        agent_messages: usize,
        /// First sequence id of the current logical conversation.
        epoch_start: u64,
    },

    /// `epoch_start` points past the end of the history.
    #[error("epoch start {epoch_start} is beyond history length {len}")]
    EpochOutOfRange {
        /// Stored epoch start.
        epoch_start: u64,
        /// Number of messages.
        len: u64,
    },
}
