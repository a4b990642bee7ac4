//! Scripted agent for deterministic tests and demos.
//!
//! Replays pre-programmed replies in order, one per invocation, without any
//! model call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{AgentRole, History, MessageContent};

use super::{Agent, AgentReply, ProgressSink};
use crate::errors::InvocationError;

/// One pre-programmed outcome.
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// Reply with this content.
    Reply(MessageContent),
    /// Fail with this invocation error.
    Fail(InvocationError),
    /// Emit these partial chunks, then resolve the inner reply.
    Partials(Vec<String>, Box<ScriptedReply>),
    /// Wait, then resolve the inner reply.
    Delay(Duration, Box<ScriptedReply>),
    /// Never finish; only cancellation or a timeout ends the call.
    Hang,
}

impl ScriptedReply {
    /// Plain-text reply.
    pub fn text(text: &str) -> Self {
        Self::Reply(MessageContent::Text(text.to_string()))
    }

    /// Upstream failure.
    pub fn fail(message: &str) -> Self {
        Self::Fail(InvocationError::Upstream(message.to_string()))
    }

    /// Wrap with partial chunks emitted before resolving.
    pub fn with_partials(chunks: &[&str], inner: ScriptedReply) -> Self {
        Self::Partials(
            chunks.iter().map(|c| (*c).to_string()).collect(),
            Box::new(inner),
        )
    }

    /// Wrap with a delay.
    pub fn delayed(delay: Duration, inner: ScriptedReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Agent that pops one [`ScriptedReply`] per call.
pub struct ScriptedAgent {
    role: AgentRole,
    replies: Mutex<VecDeque<ScriptedReply>>,
    call_count: AtomicUsize,
    seen_history_lens: Mutex<Vec<usize>>,
}

impl ScriptedAgent {
    /// Agent for `role` with its replies in call order.
    pub fn new(role: AgentRole, replies: Vec<ScriptedReply>) -> Self {
        Self {
            role,
            replies: Mutex::new(replies.into()),
            call_count: AtomicUsize::new(0),
            seen_history_lens: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    /// Invocations so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// History length observed by each invocation.
    pub fn seen_history_lens(&self) -> Vec<usize> {
        self.seen_history_lens.lock().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn invoke(
        &self,
        history: History<'_>,
        progress: &ProgressSink,
    ) -> Result<AgentReply, InvocationError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.seen_history_lens.lock().push(history.len());

        let Some(mut current) = self.replies.lock().pop_front() else {
            return Err(InvocationError::Upstream(format!(
                "{}: no scripted reply for call {idx}",
                self.role
            )));
        };

        // Unrolled iteratively to avoid recursive async.
        loop {
            match current {
                ScriptedReply::Reply(content) => return Ok(AgentReply { content }),
                ScriptedReply::Fail(e) => return Err(e),
                ScriptedReply::Partials(chunks, inner) => {
                    for chunk in chunks {
                        progress.partial(chunk);
                    }
                    current = *inner;
                }
                ScriptedReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
                ScriptedReply::Hang => return std::future::pending().await,
            }
        }
    }
}
