//! # parley-core
//!
//! Foundation types shared by every Parley crate:
//!
//! - **Branded IDs**: [`ids::ThreadId`] and [`ids::RunId`] newtypes
//! - **Content**: [`content::MessageContent`] and its canonical text normalization
//! - **Messages**: [`messages::Role`], [`messages::AgentRole`], immutable [`messages::Message`]
//! - **Message store**: append-only, gap-free [`store::MessageStore`] with a read-only [`store::History`] view
//! - **Conversation state**: [`state::ConversationState`] and [`state::Checkpoint`]
//! - **Stream events**: provisional and final [`events::StreamEvent`]s
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod content;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod state;
pub mod store;

pub use content::{ContentPart, MessageContent, UNSUPPORTED_CONTENT, normalize};
pub use errors::StateError;
pub use events::{EventBody, StreamEvent};
pub use ids::{RunId, ThreadId};
pub use logging::LogFormat;
pub use messages::{AgentRole, Message, Role, UnknownRole};
pub use state::{Checkpoint, ConversationState, ThreadStatus};
pub use store::{History, MessageStore};
