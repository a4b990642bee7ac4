//! Consumer-side de-duplication of orchestrator event streams.
//!
//! Finals are forwarded exactly once per `sequence_id`, strictly in sequence
//! order. A final that arrives ahead of a gap is held until the gap closes.
//! Provisional events are keyed by the content hash within their
//! `(turn, role)`; a repeat is dropped, and so is any provisional arriving
//! after its turn's final.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::{Stream, StreamExt};
use parley_core::{History, Role, StreamEvent, ThreadId};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::agent::EventItem;

type TurnKey = (u32, Role);

#[derive(Debug, Default)]
struct ThreadCursor {
    /// Next sequence id to forward; unset until the first final is seen.
    next_seq: Option<u64>,
    pending: BTreeMap<u64, StreamEvent>,
    partials: HashMap<TurnKey, HashSet<[u8; 32]>>,
    finished: HashSet<TurnKey>,
    highest_finished: Option<u32>,
}

impl ThreadCursor {
    fn push_final(&mut self, seq: u64, event: StreamEvent) -> Vec<StreamEvent> {
        let next = *self.next_seq.get_or_insert(seq);
        if seq < next || self.pending.contains_key(&seq) {
            trace!(seq, next, "dropping duplicate final");
            return Vec::new();
        }
        let _ = self.pending.insert(seq, event);

        let mut out = Vec::new();
        let mut next = next;
        while let Some(event) = self.pending.remove(&next) {
            self.finish_turn(&event);
            out.push(event);
            next += 1;
        }
        self.next_seq = Some(next);
        out
    }

    fn finish_turn(&mut self, event: &StreamEvent) {
        // Turn counters restart from zero when a thread is restarted. A
        // resumed user message always sits past the highest finished turn.
        let restarted = self.highest_finished.is_some_and(|highest| {
            event.turn_index < highest || (event.role.is_user() && event.turn_index <= highest)
        });
        if restarted {
            self.finished.clear();
            self.partials.clear();
            self.highest_finished = None;
        }
        if event.role.is_user() {
            return;
        }
        let key = (event.turn_index, event.role);
        let _ = self.partials.remove(&key);
        let _ = self.finished.insert(key);
        self.highest_finished = Some(
            self.highest_finished
                .map_or(event.turn_index, |h| h.max(event.turn_index)),
        );
    }

    fn push_provisional(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        let key = (event.turn_index, event.role);
        if self.finished.contains(&key) {
            trace!(turn = event.turn_index, "dropping provisional for finished turn");
            return Vec::new();
        }
        let digest: [u8; 32] = Sha256::digest(event.content().as_bytes()).into();
        if self.partials.entry(key).or_default().insert(digest) {
            vec![event]
        } else {
            Vec::new()
        }
    }
}

/// Filters a possibly repeated, possibly reordered event feed.
#[derive(Debug, Default)]
pub struct StreamDeduplicator {
    threads: HashMap<ThreadId, ThreadCursor>,
}

impl StreamDeduplicator {
    /// Deduplicator that takes the first final it sees on each thread as the
    /// starting point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the next final on `thread_id` to carry `sequence_id`.
    ///
    /// Use this when resuming a stored thread, so a reordered first final
    /// cannot become the baseline.
    #[must_use]
    pub fn expecting(mut self, thread_id: ThreadId, sequence_id: u64) -> Self {
        self.threads.entry(thread_id).or_default().next_seq = Some(sequence_id);
        self
    }

    /// Feed one event; returns the events to forward, in order.
    pub fn push(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        let cursor = self.threads.entry(event.thread_id.clone()).or_default();
        match event.sequence_id() {
            Some(seq) => cursor.push_final(seq, event),
            None => cursor.push_provisional(event),
        }
    }

    /// Finals held back waiting for a missing sequence id.
    pub fn pending(&self, thread_id: &ThreadId) -> usize {
        self.threads.get(thread_id).map_or(0, |c| c.pending.len())
    }
}

/// Wrap an orchestrator event stream in a fresh [`StreamDeduplicator`].
/// Error items pass through unchanged.
pub fn dedup_stream<S>(stream: S) -> impl Stream<Item = EventItem>
where
    S: Stream<Item = EventItem>,
{
    dedup_stream_with(stream, StreamDeduplicator::new())
}

/// Like [`dedup_stream`] with a prepared deduplicator.
pub fn dedup_stream_with<S>(
    stream: S,
    mut dedup: StreamDeduplicator,
) -> impl Stream<Item = EventItem>
where
    S: Stream<Item = EventItem>,
{
    stream.flat_map(move |item| {
        let out: Vec<EventItem> = match item {
            Ok(event) => dedup.push(event).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(out)
    })
}

/// One line of a rendered conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Speaker label.
    pub label: String,
    /// Message text.
    pub text: String,
    /// Position in the thread.
    pub sequence_id: u64,
}

/// Finals collected for display.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript of a stored history.
    pub fn from_history(history: History<'_>) -> Self {
        let entries = history
            .iter()
            .map(|m| TranscriptEntry {
                label: m.role().label().to_string(),
                text: m.content().to_string(),
                sequence_id: m.sequence_id(),
            })
            .collect();
        Self { entries }
    }

    /// Record a final event; provisional events are ignored.
    pub fn record(&mut self, event: &StreamEvent) {
        if let Some(sequence_id) = event.sequence_id() {
            self.entries.push(TranscriptEntry {
                label: event.role.label().to_string(),
                text: event.content().to_string(),
                sequence_id,
            });
        }
    }

    /// Entries in recording order.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// `LABEL: text` blocks separated by blank lines.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.label.to_uppercase(), e.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrchestratorError;
    use assert_matches::assert_matches;
    use parley_core::{AgentRole, Message};

    fn tid() -> ThreadId {
        ThreadId::from("t")
    }

    fn fin(seq: u64, turn: u32, role: Role, text: &str) -> StreamEvent {
        StreamEvent::final_message(
            tid(),
            Message::new(seq, turn, role, text.to_string(), "now".to_string()),
        )
    }

    fn prov(turn: u32, role: AgentRole, text: &str) -> StreamEvent {
        StreamEvent::provisional(tid(), turn, Role::Agent(role), text)
    }

    fn seqs(events: &[StreamEvent]) -> Vec<u64> {
        events.iter().filter_map(StreamEvent::sequence_id).collect()
    }

    #[test]
    fn finals_forward_once_in_order() {
        let mut d = StreamDeduplicator::new();
        let c = Role::Agent(AgentRole::Customer);
        assert_eq!(seqs(&d.push(fin(0, 0, Role::User, "hi"))), vec![0]);
        assert!(d.push(fin(2, 1, c, "b")).is_empty());
        assert_eq!(d.pending(&tid()), 1);
        assert!(d.push(fin(2, 1, c, "b")).is_empty());
        assert_eq!(seqs(&d.push(fin(1, 0, c, "a"))), vec![1, 2]);
        assert!(d.push(fin(1, 0, c, "a")).is_empty());
        assert!(d.push(fin(0, 0, Role::User, "hi")).is_empty());
        assert_eq!(d.pending(&tid()), 0);
    }

    #[test]
    fn repeated_provisionals_are_dropped_until_final() {
        let mut d = StreamDeduplicator::new();
        let fe = AgentRole::FrontendDeveloper;
        assert_eq!(d.push(prov(0, fe, "draft")).len(), 1);
        assert!(d.push(prov(0, fe, "draft")).is_empty());
        assert_eq!(d.push(prov(0, fe, "draft two")).len(), 1);
        assert_eq!(d.push(prov(0, AgentRole::BusinessAnalyst, "draft")).len(), 1);

        let _ = d.push(fin(0, 0, Role::Agent(fe), "done"));
        assert!(d.push(prov(0, fe, "late")).is_empty());
        assert_eq!(d.push(prov(1, fe, "draft")).len(), 1);
    }

    #[test]
    fn restarted_thread_accepts_turn_zero_again() {
        let mut d = StreamDeduplicator::new();
        let c = AgentRole::Customer;
        let _ = d.push(fin(0, 0, Role::User, "hi"));
        let _ = d.push(fin(1, 0, Role::Agent(c), "a"));
        let _ = d.push(fin(2, 1, Role::Agent(AgentRole::BusinessAnalyst), "b"));
        // new epoch: user message at turn 0, then turn 0 again
        assert_eq!(seqs(&d.push(fin(3, 0, Role::User, "again"))), vec![3]);
        assert_eq!(d.push(prov(0, c, "a")).len(), 1);
    }

    #[test]
    fn restart_after_single_turn_epoch_forwards_new_partials() {
        let mut d = StreamDeduplicator::new();
        let c = AgentRole::Customer;
        let _ = d.push(fin(0, 0, Role::User, "one"));
        assert_eq!(d.push(prov(0, c, "p1")).len(), 1);
        let _ = d.push(fin(1, 0, Role::Agent(c), "a"));

        // one-turn policy: the restarted epoch's user message is at turn 0 too
        assert_eq!(seqs(&d.push(fin(2, 0, Role::User, "two"))), vec![2]);
        assert_eq!(d.push(prov(0, c, "p2")).len(), 1);
        assert!(d.push(prov(0, c, "p2")).is_empty());
    }

    #[test]
    fn resumed_user_message_keeps_finished_turns() {
        let mut d = StreamDeduplicator::new();
        let c = AgentRole::Customer;
        let _ = d.push(fin(0, 0, Role::User, "one"));
        let _ = d.push(fin(1, 0, Role::Agent(c), "a"));
        let _ = d.push(fin(2, 1, Role::User, "more"));
        assert!(d.push(prov(0, c, "late")).is_empty());
    }

    #[test]
    fn threads_are_independent() {
        let mut d = StreamDeduplicator::new().expecting(ThreadId::from("u"), 4);
        assert_eq!(seqs(&d.push(fin(0, 0, Role::User, "hi"))), vec![0]);
        let other = StreamEvent::final_message(
            ThreadId::from("u"),
            Message::new(5, 0, Role::User, "x", "now"),
        );
        assert!(d.push(other).is_empty());
        assert_eq!(d.pending(&ThreadId::from("u")), 1);
    }

    #[tokio::test]
    async fn stream_adapter_passes_errors_through() {
        let c = Role::Agent(AgentRole::Customer);
        let items: Vec<EventItem> = vec![
            Ok(fin(0, 0, Role::User, "hi")),
            Ok(prov(0, AgentRole::Customer, "x")),
            Ok(prov(0, AgentRole::Customer, "x")),
            Ok(fin(0, 0, Role::User, "hi")),
            Ok(fin(1, 0, c, "done")),
            Err(OrchestratorError::Persistence("disk".into())),
        ];
        let out: Vec<EventItem> = dedup_stream(futures::stream::iter(items)).collect().await;
        assert_eq!(out.len(), 4);
        assert_matches!(out.last(), Some(Err(OrchestratorError::Persistence(_))));
    }

    #[test]
    fn transcript_renders_finals_only() {
        let mut t = Transcript::new();
        t.record(&fin(0, 0, Role::User, "Build a shop"));
        t.record(&prov(0, AgentRole::Customer, "typing"));
        t.record(&fin(1, 0, Role::Agent(AgentRole::FrontendDeveloper), "Sure"));
        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.render(), "USER: Build a shop\n\nFE DEV: Sure");
    }
}
