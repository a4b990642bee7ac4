//! Append-only message store for one thread.
//!
//! Sequence ids are assigned here and nowhere else, so they are gap-free
//! and start at 0. Appends take `&mut self`: one owner writes a thread at a
//! time, and readers get a [`History`] snapshot that borrows the store.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::content::{MessageContent, normalize};
use crate::errors::StateError;
use crate::messages::{Message, Role};

/// Ordered, append-only messages of a thread.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted messages, checking that ids are
    /// gap-free from 0.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, StateError> {
        for (expected, msg) in (0u64..).zip(&messages) {
            if msg.sequence_id() != expected {
                return Err(StateError::SequenceGap {
                    expected,
                    found: msg.sequence_id(),
                });
            }
        }
        Ok(Self { messages })
    }

    /// Normalize `content` and append it. Returns the assigned sequence id.
    pub fn append(&mut self, role: Role, content: &MessageContent, turn_index: u32) -> u64 {
        let sequence_id = self.next_sequence_id();
        self.messages.push(Message::new(
            sequence_id,
            turn_index,
            role,
            normalize(content),
            Utc::now().to_rfc3339(),
        ));
        sequence_id
    }

    /// Read-only view of every message.
    pub fn history(&self) -> History<'_> {
        History {
            messages: &self.messages,
        }
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Id the next append will receive.
    pub fn next_sequence_id(&self) -> u64 {
        self.messages.len() as u64
    }

    /// Message with the given id.
    pub fn get(&self, sequence_id: u64) -> Option<&Message> {
        usize::try_from(sequence_id)
            .ok()
            .and_then(|i| self.messages.get(i))
    }
}

impl TryFrom<Vec<Message>> for MessageStore {
    type Error = StateError;

    fn try_from(messages: Vec<Message>) -> Result<Self, Self::Error> {
        Self::from_messages(messages)
    }
}

impl From<MessageStore> for Vec<Message> {
    fn from(store: MessageStore) -> Self {
        store.messages
    }
}

/// Borrowed snapshot of a thread's messages.
///
/// Iterating is restartable and never mutates the store.
#[derive(Clone, Copy, Debug)]
pub struct History<'a> {
    messages: &'a [Message],
}

impl<'a> History<'a> {
    /// View over an arbitrary slice.
    pub fn from_slice(messages: &'a [Message]) -> Self {
        Self { messages }
    }

    /// Iterate in sequence order.
    pub fn iter(&self) -> std::slice::Iter<'a, Message> {
        self.messages.iter()
    }

    /// Underlying slice.
    pub fn as_slice(&self) -> &'a [Message] {
        self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message.
    pub fn last(&self) -> Option<&'a Message> {
        self.messages.last()
    }
}

impl<'a> IntoIterator for History<'a> {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
