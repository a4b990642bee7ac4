//! Agent capability.
//!
//! An [`Agent`] takes one turn: it reads the shared history and returns a
//! reply. While it works it may report partial output through a
//! [`ProgressSink`]; those chunks reach the caller as provisional events and
//! are never persisted.

pub mod persona;
pub mod scripted;

use async_trait::async_trait;
use parley_core::{AgentRole, History, MessageContent, Role, StreamEvent, ThreadId};
use tokio::sync::mpsc;

use crate::errors::{InvocationError, OrchestratorError};

pub use persona::{CompletionBackend, EchoBackend, Persona, PersonaAgent};
pub use scripted::{ScriptedAgent, ScriptedReply};

/// Reply of one agent turn.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentReply {
    /// Content in any supported shape; normalized on append.
    pub content: MessageContent,
}

impl AgentReply {
    /// Plain-text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: MessageContent::Text(text.into()),
        }
    }
}

impl From<MessageContent> for AgentReply {
    fn from(content: MessageContent) -> Self {
        Self { content }
    }
}

/// A participant that can take turns.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Role this agent speaks as.
    fn role(&self) -> AgentRole;

    /// Produce the reply for the current turn.
    async fn invoke(
        &self,
        history: History<'_>,
        progress: &ProgressSink,
    ) -> Result<AgentReply, InvocationError>;
}

/// Item carried on an orchestrator event channel.
pub type EventItem = Result<StreamEvent, OrchestratorError>;

/// Destination of the events a run emits.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EventItem>>,
}

impl EventSink {
    /// Sink paired with the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops everything.
    pub fn discard() -> Self {
        Self::default()
    }

    /// Emit an event. A closed receiver is not an error: the run continues
    /// and its results are still checkpointed.
    pub fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(event));
        }
    }

    /// Emit a terminal error item.
    pub fn fail(&self, error: OrchestratorError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(error));
        }
    }

    /// Progress handle scoped to one turn.
    pub fn progress(&self, thread_id: ThreadId, turn_index: u32, role: AgentRole) -> ProgressSink {
        ProgressSink {
            sink: self.clone(),
            thread_id,
            turn_index,
            role,
        }
    }
}

/// Per-turn handle through which an agent reports partial output.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    sink: EventSink,
    thread_id: ThreadId,
    turn_index: u32,
    role: AgentRole,
}

impl ProgressSink {
    /// Handle that drops partial output; for calling agents directly.
    pub fn detached(role: AgentRole) -> Self {
        EventSink::discard().progress(ThreadId::from("detached"), 0, role)
    }

    /// Report partial output as a provisional event.
    pub fn partial(&self, text: impl Into<String>) {
        self.sink.emit(StreamEvent::provisional(
            self.thread_id.clone(),
            self.turn_index,
            Role::Agent(self.role),
            text,
        ));
    }

    /// Role taking the turn.
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Turn being taken.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }
}
