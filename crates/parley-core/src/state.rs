//! Per-thread conversation state and its versioned checkpoint.

use serde::{Deserialize, Serialize};

use crate::content::MessageContent;
use crate::errors::StateError;
use crate::ids::ThreadId;
use crate::messages::{AgentRole, Role};
use crate::store::{History, MessageStore};

/// Lifecycle status of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// Accepting turns.
    Active,
    /// The router signalled termination.
    Terminated,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown thread status: {other}")),
        }
    }
}

/// Everything the orchestrator needs to resume a thread.
///
/// Fields are private so that the turn counter can only move together with
/// agent appends. Persisted state comes back through [`ConversationState::restore`],
/// which re-checks the invariants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    thread_id: ThreadId,
    messages: MessageStore,
    turn_index: u32,
    epoch_start: u64,
    status: ThreadStatus,
    policy_fingerprint: String,
}

impl ConversationState {
    /// Fresh, empty, active thread owned by the given router policy.
    pub fn new(thread_id: ThreadId, policy_fingerprint: impl Into<String>) -> Self {
        Self {
            thread_id,
            messages: MessageStore::new(),
            turn_index: 0,
            epoch_start: 0,
            status: ThreadStatus::Active,
            policy_fingerprint: policy_fingerprint.into(),
        }
    }

    /// Rebuild persisted state and validate it.
    pub fn restore(
        thread_id: ThreadId,
        messages: MessageStore,
        turn_index: u32,
        epoch_start: u64,
        status: ThreadStatus,
        policy_fingerprint: impl Into<String>,
    ) -> Result<Self, StateError> {
        let state = Self {
            thread_id,
            messages,
            turn_index,
            epoch_start,
            status,
            policy_fingerprint: policy_fingerprint.into(),
        };
        state.validate()?;
        Ok(state)
    }

    /// Check the turn-counter and epoch invariants.
    pub fn validate(&self) -> Result<(), StateError> {
        let len = self.messages.next_sequence_id();
        if self.epoch_start > len {
            return Err(StateError::EpochOutOfRange {
                epoch_start: self.epoch_start,
                len,
            });
        }
        let agent_messages = self
            .messages
            .history()
            .iter()
            .filter(|m| m.sequence_id() >= self.epoch_start && !m.role().is_user())
            .count();
        if agent_messages != self.turn_index as usize {
            return Err(StateError::TurnCounterMismatch {
                turn_index: self.turn_index,
                agent_messages,
                epoch_start: self.epoch_start,
            });
        }
        Ok(())
    }

    /// Append a user message at the current turn. Does not advance the turn.
    pub fn append_user(&mut self, content: &MessageContent) -> u64 {
        self.messages.append(Role::User, content, self.turn_index)
    }

    /// Append an agent reply and advance the turn counter.
    pub fn append_agent(&mut self, role: AgentRole, content: &MessageContent) -> u64 {
        let id = self.messages.append(role.into(), content, self.turn_index);
        self.turn_index += 1;
        id
    }

    /// Mark the thread as terminated.
    pub fn terminate(&mut self) {
        self.status = ThreadStatus::Terminated;
    }

    /// Start a new logical conversation on the same thread. Prior messages
    /// stay in the history.
    pub fn restart(&mut self) {
        self.turn_index = 0;
        self.epoch_start = self.messages.next_sequence_id();
        self.status = ThreadStatus::Active;
    }

    /// Thread key.
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Underlying message store.
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Read-only history view.
    pub fn history(&self) -> History<'_> {
        self.messages.history()
    }

    /// Agent turns taken in the current logical conversation.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }

    /// First sequence id of the current logical conversation.
    pub fn epoch_start(&self) -> u64 {
        self.epoch_start
    }

    /// Lifecycle status.
    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    /// Whether the router already terminated this thread.
    pub fn is_terminated(&self) -> bool {
        self.status == ThreadStatus::Terminated
    }

    /// Fingerprint of the router policy that owns this thread.
    pub fn policy_fingerprint(&self) -> &str {
        &self.policy_fingerprint
    }
}

/// A persisted state plus its compare-and-swap version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Snapshot.
    pub state: ConversationState,
    /// Incremented on every successful write; 1 after the first.
    pub version: u64,
}
