//! # parley-runtime
//!
//! Turn-dispatch orchestration for Parley.
//!
//! - [`router`]: deterministic next-speaker selection ([`RouterPolicy`],
//!   [`ClassifierRouter`])
//! - [`agent`]: the [`Agent`] capability, persona agents and scripted agents
//! - [`orchestrator`]: the per-thread run loop with checkpointing,
//!   cancellation and timeouts
//! - [`dedup`]: consumer-side stream de-duplication and transcripts
//! - [`registry`]: LRU of orchestrators keyed by conversation configuration

#![deny(unsafe_code)]

pub mod agent;
pub mod dedup;
pub mod errors;
pub mod orchestrator;
pub mod registry;
pub mod router;

pub use agent::{
    Agent, AgentReply, CompletionBackend, EchoBackend, EventItem, EventSink, Persona,
    PersonaAgent, ProgressSink, ScriptedAgent, ScriptedReply,
};
pub use dedup::{StreamDeduplicator, Transcript, TranscriptEntry, dedup_stream, dedup_stream_with};
pub use errors::{InvocationError, OrchestratorError};
pub use orchestrator::{
    EventStream, Orchestrator, OrchestratorConfig, Phase, RunOutcome, SubmitMode, SubmitRequest,
};
pub use registry::{ConversationConfig, OrchestratorRegistry, build_orchestrator};
pub use router::{
    Classification, ClassifierRouter, KeywordClassifier, RoleClassifier, Route, Router,
    RouterPolicy,
};
