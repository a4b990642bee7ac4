//! Durable checkpoint store over `SQLite`.
//!
//! A thread is one row in `threads` plus its messages in `messages`.
//! Messages are immutable, so a `put` only inserts the ones the stored
//! checkpoint does not have yet and then bumps the thread row, all inside one
//! transaction that also performs the version check.

use std::path::Path;

use chrono::Utc;
use parley_core::{
    Checkpoint, ConversationState, Message, MessageStore, Role, ThreadId, ThreadStatus,
};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument, warn};

use crate::checkpoint::CheckpointStore;
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, parse_enum};

/// [`CheckpointStore`] persisted in a `SQLite` database.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    /// Wrap an opened database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open or create the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Database::open(path).map(Self::new)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Database::in_memory().map(Self::new)
    }

    /// Underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT version, turn_index, epoch_start, status, policy_fingerprint
                 FROM threads WHERE thread_id = ?1",
            )?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let version: u64 = get(row, 0, "threads", "version")?;
            let turn_index: u32 = get(row, 1, "threads", "turn_index")?;
            let epoch_start: u64 = get(row, 2, "threads", "epoch_start")?;
            let status_raw: String = get(row, 3, "threads", "status")?;
            let status: ThreadStatus = parse_enum(&status_raw, "threads", "status")?;
            let fingerprint: String = get(row, 4, "threads", "policy_fingerprint")?;

            let messages = load_messages(conn, thread_id)?;
            let state = ConversationState::restore(
                thread_id.clone(),
                messages,
                turn_index,
                epoch_start,
                status,
                fingerprint,
            )?;
            Ok(Some(Checkpoint { state, version }))
        })
    }

    #[instrument(skip(self, state), fields(thread_id = %state.thread_id()))]
    fn put(
        &self,
        state: &ConversationState,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let thread_id = state.thread_id().as_str();
        self.db.with_conn(|conn| {
            // Dropping the transaction without commit rolls back.
            let tx = conn.unchecked_transaction()?;

            let found: Option<u64> = tx
                .query_row(
                    "SELECT version FROM threads WHERE thread_id = ?1",
                    [thread_id],
                    |row| row.get(0),
                )
                .optional()?;
            if found != expected_version {
                warn!(?expected_version, ?found, "checkpoint version conflict");
                return Err(StoreError::Conflict {
                    expected: expected_version,
                    found,
                });
            }

            let now = Utc::now().to_rfc3339();
            let version = found.map_or(1, |v| v + 1);
            let status = state.status().to_string();
            let _ = match found {
                None => tx.execute(
                    "INSERT INTO threads (thread_id, version, turn_index, epoch_start, status,
                                          policy_fingerprint, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        thread_id,
                        version,
                        state.turn_index(),
                        state.epoch_start(),
                        status,
                        state.policy_fingerprint(),
                        now,
                        now,
                    ],
                )?,
                Some(_) => tx.execute(
                    "UPDATE threads SET version = ?1, turn_index = ?2, epoch_start = ?3,
                                        status = ?4, policy_fingerprint = ?5, updated_at = ?6
                     WHERE thread_id = ?7",
                    params![
                        version,
                        state.turn_index(),
                        state.epoch_start(),
                        status,
                        state.policy_fingerprint(),
                        now,
                        thread_id,
                    ],
                )?,
            };

            let stored_next: u64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence_id) + 1, 0) FROM messages WHERE thread_id = ?1",
                [thread_id],
                |row| row.get(0),
            )?;
            if stored_next > state.messages().next_sequence_id() {
                warn!(
                    stored_next,
                    offered = state.messages().next_sequence_id(),
                    "checkpoint would truncate history"
                );
                return Err(StoreError::Conflict {
                    expected: expected_version,
                    found,
                });
            }

            let mut inserted = 0usize;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO messages (thread_id, sequence_id, turn_index, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for msg in state
                    .history()
                    .iter()
                    .filter(|m| m.sequence_id() >= stored_next)
                {
                    let _ = insert.execute(params![
                        thread_id,
                        msg.sequence_id(),
                        msg.turn_index(),
                        msg.role().tag(),
                        msg.content(),
                        msg.created_at(),
                    ])?;
                    inserted += 1;
                }
            }

            tx.commit()?;
            debug!(version, inserted, "checkpoint written");
            Ok(version)
        })
    }
}

fn load_messages(conn: &Connection, thread_id: &ThreadId) -> Result<MessageStore, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT sequence_id, turn_index, role, content, created_at
         FROM messages WHERE thread_id = ?1 ORDER BY sequence_id",
    )?;
    let mut rows = stmt.query([thread_id.as_str()])?;
    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        let role_raw: String = get(row, 2, "messages", "role")?;
        let role: Role = parse_enum(&role_raw, "messages", "role")?;
        messages.push(Message::new(
            get(row, 0, "messages", "sequence_id")?,
            get(row, 1, "messages", "turn_index")?,
            role,
            get::<String>(row, 3, "messages", "content")?,
            get::<String>(row, 4, "messages", "created_at")?,
        ));
    }
    Ok(MessageStore::from_messages(messages)?)
}
