//! Turn-dispatch orchestrator.
//!
//! One run drives one thread through the router until it terminates or a
//! turn fails:
//!
//! ```text
//! Idle -> Dispatching -> AwaitingAgent(role) -> Appending -> Dispatching ...
//!                     \-> Terminated
//! ```
//!
//! The agent call is the only suspension point. Everything the run learns is
//! written through the checkpoint store with a compare-and-swap on the
//! checkpoint version, so a failed or cancelled turn leaves the stored thread
//! exactly as it was and can be retried.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use parking_lot::Mutex;
use parley_core::{
    AgentRole, ConversationState, Message, MessageContent, RunId, StreamEvent, ThreadId,
    ThreadStatus, normalize,
};
use parley_settings::OrchestratorSettings;
use parley_store::CheckpointStore;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::agent::{Agent, AgentReply, EventItem, EventSink};
use crate::errors::{InvocationError, OrchestratorError};
use crate::router::{Route, Router};

/// Stream returned by [`Orchestrator::submit`].
pub type EventStream = Pin<Box<dyn Stream<Item = EventItem> + Send>>;

/// Orchestrator-wide defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Applied to every agent call unless the request sets its own.
    pub agent_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    /// Defaults from the `orchestrator` settings section.
    pub fn from_settings(settings: &OrchestratorSettings) -> Self {
        Self {
            agent_timeout: settings
                .agent_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

/// How a submission treats existing thread state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubmitMode {
    /// Continue the current logical conversation. Unknown threads are
    /// created; terminated ones are rejected.
    #[default]
    Resume,
    /// Start a new logical conversation on the thread, keeping its history.
    Restart,
}

/// One external invocation against a thread.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    /// Thread key.
    pub thread_id: ThreadId,
    /// New user message; `None` retries the pending turn.
    pub user_content: Option<MessageContent>,
    /// Resume or restart.
    pub mode: SubmitMode,
    /// Per-call agent timeout overriding the orchestrator default.
    pub timeout: Option<Duration>,
    /// Cancels the run at the next agent call.
    pub cancel: CancellationToken,
}

impl SubmitRequest {
    /// Resume `thread_id` with a new user message.
    pub fn new(thread_id: impl Into<ThreadId>, content: impl Into<MessageContent>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_content: Some(content.into()),
            mode: SubmitMode::Resume,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Retry the pending turn of `thread_id` without a new message.
    pub fn retry(thread_id: impl Into<ThreadId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_content: None,
            mode: SubmitMode::Resume,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Switch to [`SubmitMode::Restart`].
    #[must_use]
    pub fn restart(mut self) -> Self {
        self.mode = SubmitMode::Restart;
        self
    }

    /// Set a per-call agent timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a completed run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Identifier of this run.
    pub run_id: RunId,
    /// Thread.
    pub thread_id: ThreadId,
    /// Messages appended by this run, user message first.
    pub appended: Vec<Message>,
    /// Turn counter after the run.
    pub turn_index: u32,
    /// Thread status after the run.
    pub status: ThreadStatus,
    /// Checkpoint version after the run.
    pub version: u64,
}

/// Observable position of a run in the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No run in flight.
    Idle,
    /// Consulting the router.
    Dispatching,
    /// Waiting for this agent's reply.
    AwaitingAgent(AgentRole),
    /// Appending and checkpointing a reply.
    Appending,
    /// The router ended the thread.
    Terminated,
}

/// Tracks an in-flight run.
struct ActiveRun {
    run_id: RunId,
    cancel: CancellationToken,
    phase: Arc<Mutex<Phase>>,
    started_at: Instant,
}

/// Registration of a run in the active map; removes it on drop.
struct RunGuard {
    active_runs: Arc<DashMap<ThreadId, ActiveRun>>,
    thread_id: ThreadId,
    run_id: RunId,
    phase: Arc<Mutex<Phase>>,
}

impl RunGuard {
    fn set_phase(&self, phase: Phase) {
        debug!(thread_id = %self.thread_id, ?phase, "phase transition");
        *self.phase.lock() = phase;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        // An abort may already have removed the entry, and a new run may own it.
        let _ = self
            .active_runs
            .remove_if(&self.thread_id, |_, run| run.run_id == self.run_id);
    }
}

/// Drives threads through a router, a set of agents and a checkpoint store.
pub struct Orchestrator {
    router: Arc<dyn Router>,
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
    store: Arc<dyn CheckpointStore>,
    config: OrchestratorConfig,
    active_runs: Arc<DashMap<ThreadId, ActiveRun>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut agents: Vec<&str> = self.agents.keys().map(|role| role.tag()).collect();
        agents.sort_unstable();
        f.debug_struct("Orchestrator")
            .field("policy", &self.router.fingerprint())
            .field("agents", &agents)
            .field("config", &self.config)
            .field("active_runs", &self.active_runs.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wire an orchestrator.
    ///
    /// Fails with [`OrchestratorError::PolicyMismatch`] if the router can
    /// name a role no agent is registered for, or two agents claim one role.
    pub fn new(
        router: Arc<dyn Router>,
        agents: Vec<Arc<dyn Agent>>,
        store: Arc<dyn CheckpointStore>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        let mut by_role: HashMap<AgentRole, Arc<dyn Agent>> = HashMap::new();
        for agent in agents {
            let role = agent.role();
            if by_role.insert(role, agent).is_some() {
                return Err(OrchestratorError::PolicyMismatch(format!(
                    "more than one agent registered for {role}"
                )));
            }
        }
        let missing: Vec<&str> = router
            .agents()
            .into_iter()
            .filter(|role| !by_role.contains_key(role))
            .map(AgentRole::tag)
            .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::PolicyMismatch(format!(
                "no agent registered for: {}",
                missing.join(", ")
            )));
        }
        Ok(Self {
            router,
            agents: by_role,
            store,
            config,
            active_runs: Arc::new(DashMap::new()),
        })
    }

    /// Fingerprint of the router policy threads are bound to.
    pub fn policy_fingerprint(&self) -> String {
        self.router.fingerprint()
    }

    /// Start a run in the background and stream its events.
    ///
    /// The stream yields one final event per appended message (the user
    /// message first), interleaved with provisional events, and ends when
    /// the router terminates or after the first error item. A thread that
    /// already has a run in flight yields a single
    /// [`OrchestratorError::ConcurrentModification`] item.
    pub fn submit(self: &Arc<Self>, request: SubmitRequest) -> EventStream {
        let guard = match self.register(&request) {
            Ok(guard) => guard,
            Err(e) => {
                let item: EventItem = Err(e);
                return Box::pin(futures::stream::iter([item]));
            }
        };
        let (sink, rx) = EventSink::channel();
        let this = Arc::clone(self);
        let span = info_span!("submit", thread_id = %request.thread_id, run_id = %guard.run_id);
        drop(tokio::spawn(
            async move {
                if let Err(e) = this.drive(&request, &guard, &sink).await {
                    sink.fail(e);
                }
            }
            .instrument(span),
        ));
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Drive a run in the caller's task, emitting events to `sink`.
    #[instrument(skip_all, fields(thread_id = %request.thread_id))]
    pub async fn run(
        &self,
        request: SubmitRequest,
        sink: &EventSink,
    ) -> Result<RunOutcome, OrchestratorError> {
        let guard = self.register(&request)?;
        self.drive(&request, &guard, sink).await
    }

    /// Cancel the run on `thread_id`. Returns whether one was in flight.
    pub fn abort(&self, thread_id: &ThreadId) -> bool {
        if let Some((_, run)) = self.active_runs.remove(thread_id) {
            run.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel every run. Returns how many were in flight.
    pub fn abort_all(&self) -> usize {
        let count = self.active_runs.len();
        for entry in self.active_runs.iter() {
            entry.value().cancel.cancel();
        }
        self.active_runs.clear();
        count
    }

    /// Whether a run is in flight on `thread_id`.
    pub fn is_running(&self, thread_id: &ThreadId) -> bool {
        self.active_runs.contains_key(thread_id)
    }

    /// Runs in flight.
    pub fn active_count(&self) -> usize {
        self.active_runs.len()
    }

    /// How long the run on `thread_id` has been in flight.
    pub fn run_age(&self, thread_id: &ThreadId) -> Option<Duration> {
        self.active_runs
            .get(thread_id)
            .map(|run| run.started_at.elapsed())
    }

    /// Current phase of the run on `thread_id`.
    pub fn phase(&self, thread_id: &ThreadId) -> Phase {
        self.active_runs
            .get(thread_id)
            .map_or(Phase::Idle, |run| *run.phase.lock())
    }

    fn register(&self, request: &SubmitRequest) -> Result<RunGuard, OrchestratorError> {
        match self.active_runs.entry(request.thread_id.clone()) {
            Entry::Occupied(_) => {
                warn!(thread_id = %request.thread_id, "thread already has an active run");
                Err(OrchestratorError::ConcurrentModification {
                    thread_id: request.thread_id.clone(),
                    expected: None,
                    found: None,
                })
            }
            Entry::Vacant(slot) => {
                let run_id = RunId::new();
                let phase = Arc::new(Mutex::new(Phase::Idle));
                let _ = slot.insert(ActiveRun {
                    run_id: run_id.clone(),
                    cancel: request.cancel.clone(),
                    phase: Arc::clone(&phase),
                    started_at: Instant::now(),
                });
                Ok(RunGuard {
                    active_runs: Arc::clone(&self.active_runs),
                    thread_id: request.thread_id.clone(),
                    run_id,
                    phase,
                })
            }
        }
    }

    async fn drive(
        &self,
        request: &SubmitRequest,
        guard: &RunGuard,
        sink: &EventSink,
    ) -> Result<RunOutcome, OrchestratorError> {
        let thread_id = &request.thread_id;
        let (mut state, mut version) = self.load(thread_id)?;

        match request.mode {
            SubmitMode::Resume if state.is_terminated() => {
                return Err(OrchestratorError::ThreadTerminated {
                    thread_id: thread_id.clone(),
                });
            }
            SubmitMode::Resume => {}
            SubmitMode::Restart => {
                state.restart();
                info!(epoch_start = state.epoch_start(), "thread restarted");
            }
        }

        let mut appended = Vec::new();
        if let Some(content) = &request.user_content {
            let seq = state.append_user(content);
            version = Some(self.checkpoint(&state, version)?);
            let message = appended_message(&state, seq)?;
            sink.emit(StreamEvent::final_message(thread_id.clone(), message.clone()));
            appended.push(message);
        } else if request.mode == SubmitMode::Restart {
            version = Some(self.checkpoint(&state, version)?);
        }

        loop {
            guard.set_phase(Phase::Dispatching);
            let role = match self.router.next(state.turn_index(), state.history()) {
                Route::Terminate => {
                    state.terminate();
                    version = Some(self.checkpoint(&state, version)?);
                    guard.set_phase(Phase::Terminated);
                    info!(turns = state.turn_index(), "thread terminated");
                    break;
                }
                Route::Agent(role) => role,
            };
            let agent = self.agents.get(&role).ok_or_else(|| {
                OrchestratorError::PolicyMismatch(format!("router named unregistered agent {role}"))
            })?;

            guard.set_phase(Phase::AwaitingAgent(role));
            let reply = self.invoke(agent.as_ref(), &state, role, request, sink).await?;

            guard.set_phase(Phase::Appending);
            let seq = state.append_agent(role, &reply.content);
            version = Some(self.checkpoint(&state, version)?);
            let message = appended_message(&state, seq)?;
            info!(agent = %role, turn = message.turn_index(), sequence_id = seq, "turn completed");
            sink.emit(StreamEvent::final_message(thread_id.clone(), message.clone()));
            appended.push(message);
        }

        Ok(RunOutcome {
            run_id: guard.run_id.clone(),
            thread_id: thread_id.clone(),
            appended,
            turn_index: state.turn_index(),
            status: state.status(),
            version: version.unwrap_or_default(),
        })
    }

    /// Load and validate the stored thread, or start a fresh one.
    fn load(
        &self,
        thread_id: &ThreadId,
    ) -> Result<(ConversationState, Option<u64>), OrchestratorError> {
        let fingerprint = self.router.fingerprint();
        let stored = self
            .store
            .get(thread_id)
            .map_err(|e| OrchestratorError::from_store(thread_id, e))?;
        let Some(checkpoint) = stored else {
            debug!(%thread_id, "new thread");
            return Ok((ConversationState::new(thread_id.clone(), fingerprint), None));
        };

        checkpoint
            .state
            .validate()
            .map_err(|e| OrchestratorError::InvalidState(format!("thread {thread_id}: {e}")))?;
        if checkpoint.state.thread_id() != thread_id {
            return Err(OrchestratorError::InvalidState(format!(
                "checkpoint for {thread_id} belongs to {}",
                checkpoint.state.thread_id()
            )));
        }
        if checkpoint.state.policy_fingerprint() != fingerprint {
            return Err(OrchestratorError::PolicyMismatch(format!(
                "thread {thread_id} was started under policy {}, this orchestrator runs {fingerprint}",
                checkpoint.state.policy_fingerprint()
            )));
        }
        Ok((checkpoint.state, Some(checkpoint.version)))
    }

    async fn invoke(
        &self,
        agent: &dyn Agent,
        state: &ConversationState,
        role: AgentRole,
        request: &SubmitRequest,
        sink: &EventSink,
    ) -> Result<AgentReply, OrchestratorError> {
        let thread_id = &request.thread_id;
        let turn_index = state.turn_index();
        let progress = sink.progress(thread_id.clone(), turn_index, role);
        let limit = request.timeout.or(self.config.agent_timeout);

        let call = agent.invoke(state.history(), &progress);
        let bounded = async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(InvocationError::Timeout(limit))),
                None => call.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            () = request.cancel.cancelled() => {
                warn!(agent = %role, turn_index, "run cancelled");
                return Err(OrchestratorError::Cancelled {
                    thread_id: thread_id.clone(),
                    turn_index,
                    agent: role,
                });
            }
            outcome = bounded => outcome,
        };

        let reply = outcome.and_then(|reply| {
            if normalize(&reply.content).trim().is_empty() {
                Err(InvocationError::EmptyReply)
            } else {
                Ok(reply)
            }
        });
        reply.map_err(|cause| {
            warn!(agent = %role, turn_index, error = %cause, "agent invocation failed");
            OrchestratorError::AgentInvocationFailed {
                thread_id: thread_id.clone(),
                turn_index,
                agent: role,
                cause,
            }
        })
    }

    fn checkpoint(
        &self,
        state: &ConversationState,
        expected: Option<u64>,
    ) -> Result<u64, OrchestratorError> {
        self.store
            .put(state, expected)
            .map_err(|e| OrchestratorError::from_store(state.thread_id(), e))
    }
}

fn appended_message(state: &ConversationState, seq: u64) -> Result<Message, OrchestratorError> {
    state.messages().get(seq).cloned().ok_or_else(|| {
        OrchestratorError::InvalidState(format!("appended message {seq} is missing"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ScriptedAgent, ScriptedReply};
    use crate::router::RouterPolicy;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use parley_store::InMemoryCheckpointStore;

    fn scripted(role: AgentRole, replies: &[&str]) -> Arc<ScriptedAgent> {
        Arc::new(ScriptedAgent::new(
            role,
            replies.iter().map(|r| ScriptedReply::text(r)).collect(),
        ))
    }

    fn orchestrator(
        queue: Vec<AgentRole>,
        max_turns: u32,
        agents: Vec<Arc<dyn Agent>>,
    ) -> (Orchestrator, Arc<InMemoryCheckpointStore>) {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let router = Arc::new(RouterPolicy::new(queue, max_turns).unwrap());
        let orch = Orchestrator::new(
            router,
            agents,
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            OrchestratorConfig::default(),
        )
        .unwrap();
        (orch, store)
    }

    #[test]
    fn construction_requires_every_routed_agent() {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let result = Orchestrator::new(
            Arc::new(RouterPolicy::discovery_meeting()),
            vec![scripted(AgentRole::Customer, &[]) as Arc<dyn Agent>],
            store,
            OrchestratorConfig::default(),
        );
        assert_matches!(result, Err(OrchestratorError::PolicyMismatch(m)) if m.contains("fe, ba"));
    }

    #[test]
    fn duplicate_agents_are_rejected() {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let result = Orchestrator::new(
            Arc::new(RouterPolicy::new(vec![AgentRole::Customer], 1).unwrap()),
            vec![
                scripted(AgentRole::Customer, &[]) as Arc<dyn Agent>,
                scripted(AgentRole::Customer, &[]) as Arc<dyn Agent>,
            ],
            store,
            OrchestratorConfig::default(),
        );
        assert_matches!(result, Err(OrchestratorError::PolicyMismatch(_)));
    }

    #[tokio::test]
    async fn run_appends_user_then_agents_and_terminates() {
        let customer = scripted(AgentRole::Customer, &["I sell lamps."]);
        let fe = scripted(AgentRole::FrontendDeveloper, &["Use a single page."]);
        let (orch, store) = orchestrator(
            vec![AgentRole::Customer, AgentRole::FrontendDeveloper],
            2,
            vec![customer.clone(), fe.clone()],
        );

        let outcome = orch
            .run(SubmitRequest::new("t1", "Hello"), &EventSink::discard())
            .await
            .unwrap();

        let contents: Vec<&str> = outcome.appended.iter().map(Message::content).collect();
        assert_eq!(contents, vec!["Hello", "I sell lamps.", "Use a single page."]);
        assert_eq!(outcome.turn_index, 2);
        assert_eq!(outcome.status, ThreadStatus::Terminated);
        // user message, two turns, termination
        assert_eq!(outcome.version, 4);
        assert_eq!(customer.seen_history_lens(), vec![1]);
        assert_eq!(fe.seen_history_lens(), vec![2]);

        let cp = store.get(&ThreadId::from("t1")).unwrap().unwrap();
        assert!(cp.state.is_terminated());
        assert_eq!(cp.version, 4);
        assert!(!orch.is_running(&ThreadId::from("t1")));
    }

    #[tokio::test]
    async fn resume_on_terminated_thread_is_rejected() {
        let (orch, _) = orchestrator(
            vec![AgentRole::Customer],
            1,
            vec![scripted(AgentRole::Customer, &["a"])],
        );
        let _ = orch
            .run(SubmitRequest::new("t", "hi"), &EventSink::discard())
            .await
            .unwrap();
        assert_matches!(
            orch.run(SubmitRequest::new("t", "again"), &EventSink::discard()).await,
            Err(OrchestratorError::ThreadTerminated { .. })
        );
    }

    #[tokio::test]
    async fn restart_keeps_history_and_resets_turns() {
        let customer = scripted(AgentRole::Customer, &["first", "second"]);
        let (orch, store) = orchestrator(vec![AgentRole::Customer], 1, vec![customer.clone()]);
        let _ = orch
            .run(SubmitRequest::new("t", "one"), &EventSink::discard())
            .await
            .unwrap();
        let outcome = orch
            .run(SubmitRequest::new("t", "two").restart(), &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(outcome.turn_index, 1);
        assert_eq!(customer.seen_history_lens(), vec![1, 3]);

        let state = store.get(&ThreadId::from("t")).unwrap().unwrap().state;
        let contents: Vec<&str> = state.history().iter().map(Message::content).collect();
        assert_eq!(contents, vec!["one", "first", "two", "second"]);
        assert_eq!(state.epoch_start(), 2);
    }

    #[tokio::test]
    async fn empty_reply_fails_the_turn() {
        let (orch, store) = orchestrator(
            vec![AgentRole::Customer],
            1,
            vec![scripted(AgentRole::Customer, &["   "])],
        );
        let err = orch
            .run(SubmitRequest::new("t", "hi"), &EventSink::discard())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            OrchestratorError::AgentInvocationFailed {
                turn_index: 0,
                agent: AgentRole::Customer,
                cause: InvocationError::EmptyReply,
                ..
            }
        );
        let cp = store.get(&ThreadId::from("t")).unwrap().unwrap();
        assert_eq!(cp.state.messages().len(), 1);
        assert_eq!(cp.state.turn_index(), 0);
    }

    #[tokio::test]
    async fn policy_change_is_detected_on_resume() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let first = Orchestrator::new(
            Arc::new(RouterPolicy::new(vec![AgentRole::Customer; 3], 3).unwrap()),
            vec![Arc::new(ScriptedAgent::new(
                AgentRole::Customer,
                vec![ScriptedReply::fail("down")],
            )) as Arc<dyn Agent>],
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            OrchestratorConfig::default(),
        )
        .unwrap();
        assert!(
            first
                .run(SubmitRequest::new("t", "hi"), &EventSink::discard())
                .await
                .is_err()
        );

        let second = Orchestrator::new(
            Arc::new(RouterPolicy::new(vec![AgentRole::Customer; 3], 2).unwrap()),
            vec![scripted(AgentRole::Customer, &["b"]) as Arc<dyn Agent>],
            store as Arc<dyn CheckpointStore>,
            OrchestratorConfig::default(),
        )
        .unwrap();
        assert_matches!(
            second.run(SubmitRequest::retry("t"), &EventSink::discard()).await,
            Err(OrchestratorError::PolicyMismatch(_))
        );
    }

    #[tokio::test]
    async fn corrupted_checkpoint_is_invalid_state() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let policy = RouterPolicy::new(vec![AgentRole::Customer], 1).unwrap();
        let json = serde_json::json!({
            "threadId": "t",
            "messages": [
                {"sequenceId": 0, "turnIndex": 0, "role": "user", "content": "hi", "createdAt": "x"}
            ],
            "turnIndex": 1,
            "epochStart": 0,
            "status": "active",
            "policyFingerprint": policy.fingerprint(),
        });
        let corrupt: ConversationState = serde_json::from_value(json).unwrap();
        let _ = store.put(&corrupt, None).unwrap();

        let orch = Orchestrator::new(
            Arc::new(policy),
            vec![scripted(AgentRole::Customer, &["a"]) as Arc<dyn Agent>],
            store as Arc<dyn CheckpointStore>,
            OrchestratorConfig::default(),
        )
        .unwrap();
        assert_matches!(
            orch.run(SubmitRequest::retry("t"), &EventSink::discard()).await,
            Err(OrchestratorError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn submit_streams_finals_in_order() {
        let (orch, _) = orchestrator(
            vec![AgentRole::Customer, AgentRole::BusinessAnalyst],
            2,
            vec![
                Arc::new(ScriptedAgent::new(
                    AgentRole::Customer,
                    vec![ScriptedReply::with_partials(&["I", "I run"], ScriptedReply::text("I run a shop"))],
                )),
                scripted(AgentRole::BusinessAnalyst, &["Scope?"]),
            ],
        );
        let orch = Arc::new(orch);
        let events: Vec<StreamEvent> = orch
            .submit(SubmitRequest::new("t", "hi"))
            .map(|item| item.unwrap())
            .collect()
            .await;

        let finals: Vec<u64> = events.iter().filter_map(StreamEvent::sequence_id).collect();
        assert_eq!(finals, vec![0, 1, 2]);
        let provisional: Vec<&str> = events
            .iter()
            .filter(|e| !e.is_final())
            .map(StreamEvent::content)
            .collect();
        assert_eq!(provisional, vec!["I", "I run"]);
        assert_eq!(orch.active_count(), 0);
    }

    #[tokio::test]
    async fn second_submit_on_running_thread_is_rejected() {
        let (orch, _) = orchestrator(
            vec![AgentRole::Customer],
            1,
            vec![Arc::new(ScriptedAgent::new(
                AgentRole::Customer,
                vec![ScriptedReply::Hang],
            ))],
        );
        let orch = Arc::new(orch);
        let _running = orch.submit(SubmitRequest::new("t", "hi"));
        assert!(orch.is_running(&ThreadId::from("t")));

        let mut second = orch.submit(SubmitRequest::new("t", "again"));
        assert_matches!(
            second.next().await,
            Some(Err(OrchestratorError::ConcurrentModification { .. }))
        );
        assert!(second.next().await.is_none());
        assert_eq!(orch.abort_all(), 1);
    }

    #[tokio::test]
    async fn abort_cancels_and_reports_phase() {
        let (orch, store) = orchestrator(
            vec![AgentRole::Customer],
            1,
            vec![Arc::new(ScriptedAgent::new(
                AgentRole::Customer,
                vec![ScriptedReply::Hang],
            ))],
        );
        let orch = Arc::new(orch);
        let tid = ThreadId::from("t");
        assert_eq!(orch.phase(&tid), Phase::Idle);

        let mut events = orch.submit(SubmitRequest::new("t", "hi"));
        // The user message is checkpointed before the agent is awaited.
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.sequence_id(), Some(0));
        while orch.phase(&tid) != Phase::AwaitingAgent(AgentRole::Customer) {
            tokio::task::yield_now().await;
        }

        assert!(orch.abort(&tid));
        assert!(!orch.abort(&tid));
        assert_matches!(
            events.next().await,
            Some(Err(OrchestratorError::Cancelled { turn_index: 0, .. }))
        );
        assert!(events.next().await.is_none());

        let cp = store.get(&tid).unwrap().unwrap();
        assert_eq!(cp.state.messages().len(), 1);
        assert_eq!(orch.phase(&tid), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn run_age_tracks_the_run_in_flight() {
        let (orch, _) = orchestrator(
            vec![AgentRole::Customer],
            1,
            vec![Arc::new(ScriptedAgent::new(
                AgentRole::Customer,
                vec![ScriptedReply::Hang],
            ))],
        );
        let orch = Arc::new(orch);
        let tid = ThreadId::from("t");
        assert_eq!(orch.run_age(&tid), None);

        let _events = orch.submit(SubmitRequest::new("t", "hi"));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(orch.run_age(&tid).unwrap() >= Duration::from_secs(5));

        assert!(orch.abort(&tid));
        assert_eq!(orch.run_age(&tid), None);
    }

    #[test]
    fn debug_names_policy_and_agents() {
        let (orch, _) = orchestrator(
            vec![AgentRole::Customer],
            1,
            vec![scripted(AgentRole::Customer, &[]) as Arc<dyn Agent>],
        );
        let rendered = format!("{orch:?}");
        assert!(rendered.starts_with("Orchestrator {"));
        assert!(rendered.contains(&orch.policy_fingerprint()));
        assert!(rendered.contains("customer"));
        assert!(rendered.contains("active_runs: 0"));
    }

    #[test]
    fn zero_timeout_setting_disables_the_limit() {
        let mut settings = OrchestratorSettings::default();
        assert_eq!(
            OrchestratorConfig::from_settings(&settings).agent_timeout,
            Some(Duration::from_secs(120))
        );
        settings.agent_timeout_ms = Some(0);
        assert_eq!(OrchestratorConfig::from_settings(&settings).agent_timeout, None);
        settings.agent_timeout_ms = None;
        assert_eq!(OrchestratorConfig::from_settings(&settings).agent_timeout, None);
    }

    #[tokio::test]
    async fn zero_turn_policy_only_records_user_message() {
        let (orch, store) = orchestrator(vec![], 0, vec![]);
        let outcome = orch
            .run(SubmitRequest::new("t", "hi"), &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(outcome.appended.len(), 1);
        assert_eq!(outcome.status, ThreadStatus::Terminated);
        assert_eq!(store.get(&ThreadId::from("t")).unwrap().unwrap().version, 2);
    }
}
