//! Store-side failures.

use parley_core::StateError;

/// Error raised by a [`CheckpointStore`](crate::CheckpointStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected a statement or could not be opened.
    #[error("database error: {0}")]
    Database(String),

    /// The stored version did not match the expected one.
    #[error("version conflict: expected {expected:?}, found {found:?}")]
    Conflict {
        /// Version the writer read before writing; `None` for a new thread.
        expected: Option<u64>,
        /// Version actually stored; `None` if the thread does not exist.
        found: Option<u64>,
    },

    /// A persisted row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },

    /// Persisted rows decoded but violate the thread invariants.
    #[error("invalid persisted state: {0}")]
    InvalidState(#[from] StateError),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
