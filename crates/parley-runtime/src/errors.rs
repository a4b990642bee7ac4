//! Runtime error types.

use std::time::Duration;

use parley_core::{AgentRole, ThreadId};
use parley_store::StoreError;

/// Why a single agent invocation failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// The backend (model call, network) failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// The call did not finish within the allowed time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The reply normalized to empty text.
    #[error("agent returned an empty reply")]
    EmptyReply,
}

/// Errors surfaced by the orchestrator.
///
/// None of them leave a partial write behind: a failed turn appends nothing
/// and does not move the checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A checkpoint or constructed state violates the thread invariants.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Router policy and agents or stored thread do not agree.
    #[error("Policy mismatch: {0}")]
    PolicyMismatch(String),

    /// The agent taking the turn failed.
    #[error("Agent {agent} failed on thread {thread_id} at turn {turn_index}: {cause}")]
    AgentInvocationFailed {
        /// Thread.
        thread_id: ThreadId,
        /// Turn that was being taken.
        turn_index: u32,
        /// Agent that was invoked.
        agent: AgentRole,
        /// Agent-side failure.
        #[source]
        cause: InvocationError,
    },

    /// The caller cancelled while an agent was working.
    #[error("Cancelled on thread {thread_id} at turn {turn_index} while awaiting {agent}")]
    Cancelled {
        /// Thread.
        thread_id: ThreadId,
        /// Turn that was being taken.
        turn_index: u32,
        /// Agent that was invoked.
        agent: AgentRole,
    },

    /// The router already ended this thread; restart it to continue.
    #[error("Thread terminated: {thread_id}")]
    ThreadTerminated {
        /// Thread.
        thread_id: ThreadId,
    },

    /// Another writer owns or advanced the thread.
    #[error(
        "Concurrent modification on thread {thread_id}: expected version {expected:?}, found {found:?}"
    )]
    ConcurrentModification {
        /// Thread.
        thread_id: ThreadId,
        /// Version this run expected; `None` if it is not known.
        expected: Option<u64>,
        /// Version actually stored; `None` if it is not known.
        found: Option<u64>,
    },

    /// The checkpoint backend failed.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl OrchestratorError {
    /// Map a store failure on `thread_id` into the orchestrator taxonomy.
    pub fn from_store(thread_id: &ThreadId, err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, found } => Self::ConcurrentModification {
                thread_id: thread_id.clone(),
                expected,
                found,
            },
            StoreError::InvalidState(e) => Self::InvalidState(format!("thread {thread_id}: {e}")),
            e @ StoreError::CorruptRow { .. } => {
                Self::InvalidState(format!("thread {thread_id}: {e}"))
            }
            e => Self::Persistence(e.to_string()),
        }
    }

    /// Whether submitting the same request again can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AgentInvocationFailed { .. }
            | Self::Cancelled { .. }
            | Self::ConcurrentModification { .. }
            | Self::Persistence(_) => true,
            Self::InvalidState(_) | Self::PolicyMismatch(_) | Self::ThreadTerminated { .. } => {
                false
            }
        }
    }

    /// Error category string for logs and callers.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::PolicyMismatch(_) => "policy_mismatch",
            Self::AgentInvocationFailed { .. } => "agent_invocation_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::ThreadTerminated { .. } => "thread_terminated",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::Persistence(_) => "persistence",
        }
    }
}
