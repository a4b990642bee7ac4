//! Events streamed to callers while a thread runs.
//!
//! A turn produces zero or more provisional events (partial output, never
//! persisted) followed by exactly one final event carrying the appended
//! [`Message`].

use serde::{Deserialize, Serialize};

use crate::ids::ThreadId;
use crate::messages::{Message, Role};

/// Payload of a [`StreamEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventBody {
    /// Partial output of an in-flight turn.
    Provisional {
        /// Partial text.
        content: String,
    },
    /// A message that was appended and checkpointed.
    Final {
        /// The appended message.
        message: Message,
    },
}

/// One event on the caller-visible stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Thread the event belongs to.
    pub thread_id: ThreadId,
    /// Router turn the event belongs to.
    pub turn_index: u32,
    /// Producer of the event.
    pub role: Role,
    /// Payload.
    pub body: EventBody,
}

impl StreamEvent {
    /// Partial output from `role` during `turn_index`.
    pub fn provisional(
        thread_id: ThreadId,
        turn_index: u32,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            thread_id,
            turn_index,
            role,
            body: EventBody::Provisional {
                content: content.into(),
            },
        }
    }

    /// Final event for an appended message.
    pub fn final_message(thread_id: ThreadId, message: Message) -> Self {
        Self {
            thread_id,
            turn_index: message.turn_index(),
            role: message.role(),
            body: EventBody::Final { message },
        }
    }

    /// Whether this is a final event.
    pub fn is_final(&self) -> bool {
        matches!(self.body, EventBody::Final { .. })
    }

    /// Sequence id of the message carried by a final event.
    pub fn sequence_id(&self) -> Option<u64> {
        match &self.body {
            EventBody::Final { message } => Some(message.sequence_id()),
            EventBody::Provisional { .. } => None,
        }
    }

    /// Text carried by the event.
    pub fn content(&self) -> &str {
        match &self.body {
            EventBody::Provisional { content } => content,
            EventBody::Final { message } => message.content(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::AgentRole;

    #[test]
    fn final_event_takes_turn_and_role_from_message() {
        let msg = Message::new(4, 2, AgentRole::BusinessAnalyst.into(), "done", "t");
        let ev = StreamEvent::final_message(ThreadId::from("t"), msg);
        assert!(ev.is_final());
        assert_eq!(ev.turn_index, 2);
        assert_eq!(ev.role, Role::Agent(AgentRole::BusinessAnalyst));
        assert_eq!(ev.sequence_id(), Some(4));
        assert_eq!(ev.content(), "done");
    }

    #[test]
    fn provisional_has_no_sequence_id() {
        let ev = StreamEvent::provisional(ThreadId::from("t"), 0, Role::User, "par");
        assert!(!ev.is_final());
        assert_eq!(ev.sequence_id(), None);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["body"]["kind"], "provisional");
    }
}
