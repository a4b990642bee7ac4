//! Persona-driven agents over a pluggable completion backend.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{AgentRole, History, MessageContent};

use super::{Agent, AgentReply, ProgressSink};
use crate::errors::InvocationError;

const FRONTEND_INSTRUCTIONS: &str = "\
You are a senior frontend engineer in a product discovery meeting.
Move the implementation toward a minimal working MVP, one step at a time.
Answer in at most five short sentences. Do not repeat earlier questions.
When the analyst asks something, answer with one concrete choice, then give
the next technical step as a single actionable instruction.
Once MVP scope and storage are decided, say \"MVP agreed. Ready to implement.\"";

const ANALYST_INSTRUCTIONS: &str = "\
You are a business analyst in a product discovery meeting.
Ask exactly one clarifying question per turn and never repeat one.
Cover MVP scope first, then storage, then edge cases.
Once scope and storage are decided, summarize the requirements in two bullets.";

/// Role plus the instructions handed to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Persona {
    /// Role the persona speaks as.
    pub role: AgentRole,
    /// System instructions.
    pub instructions: String,
}

impl Persona {
    /// The customer, briefed with what they want built.
    pub fn customer(product_brief: &str) -> Self {
        Self {
            role: AgentRole::Customer,
            instructions: format!(
                "You are the customer in a product discovery meeting.\n\
                 Always answer the business analyst's questions.\n\n\
                 PRODUCT BRIEF:\n{}",
                product_brief.trim()
            ),
        }
    }

    /// The frontend developer.
    pub fn frontend_developer() -> Self {
        Self {
            role: AgentRole::FrontendDeveloper,
            instructions: FRONTEND_INSTRUCTIONS.to_string(),
        }
    }

    /// The business analyst.
    pub fn business_analyst() -> Self {
        Self {
            role: AgentRole::BusinessAnalyst,
            instructions: ANALYST_INSTRUCTIONS.to_string(),
        }
    }

    /// One persona per discovery role.
    pub fn discovery_panel(product_brief: &str) -> Vec<Self> {
        vec![
            Self::customer(product_brief),
            Self::frontend_developer(),
            Self::business_analyst(),
        ]
    }
}

/// The model call behind a persona.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Complete the conversation under `instructions`.
    async fn complete(
        &self,
        instructions: &str,
        history: History<'_>,
        progress: &ProgressSink,
    ) -> Result<MessageContent, InvocationError>;
}

/// [`Agent`] that speaks as a [`Persona`] through a backend.
pub struct PersonaAgent<B> {
    persona: Persona,
    backend: Arc<B>,
}

impl<B: CompletionBackend> PersonaAgent<B> {
    /// Bind a persona to a backend.
    pub fn new(persona: Persona, backend: Arc<B>) -> Self {
        Self { persona, backend }
    }

    /// The persona.
    pub fn persona(&self) -> &Persona {
        &self.persona
    }
}

#[async_trait]
impl<B: CompletionBackend> Agent for PersonaAgent<B> {
    fn role(&self) -> AgentRole {
        self.persona.role
    }

    async fn invoke(
        &self,
        history: History<'_>,
        progress: &ProgressSink,
    ) -> Result<AgentReply, InvocationError> {
        let content = self
            .backend
            .complete(&self.persona.instructions, history, progress)
            .await?;
        Ok(AgentReply { content })
    }
}

/// Offline backend that acknowledges the latest message.
///
/// Streams its reply word by word as cumulative partial output, then returns
/// the full text.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoBackend;

impl EchoBackend {
    const EXCERPT_CHARS: usize = 80;

    fn reply_for(role: AgentRole, history: History<'_>) -> String {
        match history.last() {
            None => format!("{} here. What are we building?", role.label()),
            Some(last) => {
                let excerpt: String = last.content().chars().take(Self::EXCERPT_CHARS).collect();
                let ellipsis = if last.content().chars().count() > Self::EXCERPT_CHARS {
                    "..."
                } else {
                    ""
                };
                format!(
                    "{} replying to {}: \"{excerpt}{ellipsis}\"",
                    role.label(),
                    last.role().label()
                )
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    async fn complete(
        &self,
        _instructions: &str,
        history: History<'_>,
        progress: &ProgressSink,
    ) -> Result<MessageContent, InvocationError> {
        let reply = Self::reply_for(progress.role(), history);
        let mut so_far = String::new();
        for word in reply.split_whitespace() {
            if !so_far.is_empty() {
                so_far.push(' ');
            }
            so_far.push_str(word);
            progress.partial(so_far.clone());
            tokio::task::yield_now().await;
        }
        Ok(MessageContent::Text(reply))
    }
}
