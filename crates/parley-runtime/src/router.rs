//! Turn routing.
//!
//! A [`Router`] decides who speaks next from the current turn counter and
//! the shared history. Routers are pure: same inputs, same [`Route`], no
//! side effects. Each router reports a fingerprint of its configuration,
//! which a thread records on creation so that it is never resumed under a
//! different policy.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use parley_core::{AgentRole, History, Message};
use parley_settings::OrchestratorSettings;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

use crate::errors::OrchestratorError;

/// Outcome of a routing decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// This agent takes the turn.
    Agent(AgentRole),
    /// The conversation is over.
    Terminate,
}

/// Routing policy seam.
pub trait Router: Send + Sync {
    /// Decide the next speaker.
    fn next(&self, turn_index: u32, history: History<'_>) -> Route;

    /// Turn count at which the router always terminates.
    fn max_turns(&self) -> u32;

    /// Stable identifier of this router's configuration.
    fn fingerprint(&self) -> String;

    /// Every role this router can ever name.
    fn agents(&self) -> Vec<AgentRole>;
}

fn hex_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixed queue
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed speaking order: turn `i` goes to `queue[i]` until `max_turns`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterPolicy {
    queue: Vec<AgentRole>,
    max_turns: u32,
}

impl RouterPolicy {
    /// Build a policy. The queue must cover every turn before `max_turns`.
    pub fn new(queue: Vec<AgentRole>, max_turns: u32) -> Result<Self, OrchestratorError> {
        if queue.len() < max_turns as usize {
            return Err(OrchestratorError::PolicyMismatch(format!(
                "queue of length {} cannot cover {max_turns} turns",
                queue.len()
            )));
        }
        Ok(Self { queue, max_turns })
    }

    /// Three rounds of customer, frontend, analyst, frontend, analyst; six
    /// turns.
    pub fn discovery_meeting() -> Self {
        Self {
            queue: parley_settings::discovery_queue(),
            max_turns: 6,
        }
    }

    /// Frontend and analyst alternating, frontend first; ten turns.
    pub fn pair_review() -> Self {
        Self {
            queue: [AgentRole::FrontendDeveloper, AgentRole::BusinessAnalyst].repeat(5),
            max_turns: 10,
        }
    }

    /// Policy described by the `orchestrator` settings section.
    pub fn from_settings(settings: &OrchestratorSettings) -> Result<Self, OrchestratorError> {
        Self::new(settings.queue.clone(), settings.max_turns)
    }

    /// Speaking order.
    pub fn queue(&self) -> &[AgentRole] {
        &self.queue
    }
}

impl Router for RouterPolicy {
    fn next(&self, turn_index: u32, _history: History<'_>) -> Route {
        if turn_index >= self.max_turns {
            return Route::Terminate;
        }
        // max_turns <= queue.len() is checked at construction.
        self.queue
            .get(turn_index as usize)
            .map_or(Route::Terminate, |role| Route::Agent(*role))
    }

    fn max_turns(&self) -> u32 {
        self.max_turns
    }

    fn fingerprint(&self) -> String {
        let tags: Vec<&str> = self.queue.iter().map(|r| r.tag()).collect();
        hex_digest(&format!("queue:{}|max:{}", tags.join(","), self.max_turns))
    }

    fn agents(&self) -> Vec<AgentRole> {
        let used: BTreeSet<AgentRole> = self
            .queue
            .iter()
            .take(self.max_turns as usize)
            .copied()
            .collect();
        used.into_iter().collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classifier-driven
// ─────────────────────────────────────────────────────────────────────────────

/// Result of classifying a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// The message is addressed to this role.
    Role(AgentRole),
    /// No role matched.
    Other,
}

/// Maps a message to the role that should answer it.
pub trait RoleClassifier: Send + Sync {
    /// Classify one message. Must be deterministic.
    fn classify(&self, message: &Message) -> Classification;

    /// Roles this classifier can return.
    fn roles(&self) -> Vec<AgentRole>;

    /// Stable identifier of the classifier configuration.
    fn id(&self) -> String;
}

/// Regex rules checked in order; the first match wins.
#[derive(Clone, Debug)]
pub struct KeywordClassifier {
    rules: Vec<(Regex, AgentRole)>,
}

impl KeywordClassifier {
    /// Build from `(pattern, role)` pairs. Patterns are case-insensitive.
    pub fn new<'a>(
        rules: impl IntoIterator<Item = (&'a str, AgentRole)>,
    ) -> Result<Self, OrchestratorError> {
        let rules = rules
            .into_iter()
            .map(|(pattern, role)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, role))
                    .map_err(|e| OrchestratorError::PolicyMismatch(format!("bad pattern: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Built-in rules for the discovery roles.
    pub fn discovery() -> Result<Self, OrchestratorError> {
        Self::new([
            (
                r"\b(frontend|front-end|ui|css|html|component|layout|mobile)\b",
                AgentRole::FrontendDeveloper,
            ),
            (
                r"\b(requirement|scope|mvp|storage|edge case|acceptance)s?\b",
                AgentRole::BusinessAnalyst,
            ),
            (
                r"\b(budget|price|customer|brief|deadline)s?\b",
                AgentRole::Customer,
            ),
        ])
    }
}

impl RoleClassifier for KeywordClassifier {
    fn classify(&self, message: &Message) -> Classification {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(message.content()))
            .map_or(Classification::Other, |(_, role)| Classification::Role(*role))
    }

    fn roles(&self) -> Vec<AgentRole> {
        let roles: BTreeSet<AgentRole> = self.rules.iter().map(|(_, role)| *role).collect();
        roles.into_iter().collect()
    }

    fn id(&self) -> String {
        let parts: Vec<String> = self
            .rules
            .iter()
            .map(|(re, role)| format!("{}={}", role.tag(), re.as_str()))
            .collect();
        format!("keyword[{}]", parts.join(";"))
    }
}

/// Routes each turn to the role the latest message is addressed to.
pub struct ClassifierRouter<C> {
    classifier: C,
    fallback: AgentRole,
    max_turns: u32,
}

impl<C: RoleClassifier> ClassifierRouter<C> {
    /// `fallback` answers messages classified as [`Classification::Other`]
    /// and the very first turn of an empty thread.
    pub fn new(classifier: C, fallback: AgentRole, max_turns: u32) -> Self {
        Self {
            classifier,
            fallback,
            max_turns,
        }
    }
}

impl<C: RoleClassifier> Router for ClassifierRouter<C> {
    fn next(&self, turn_index: u32, history: History<'_>) -> Route {
        if turn_index >= self.max_turns {
            return Route::Terminate;
        }
        let role = match history.last().map(|m| self.classifier.classify(m)) {
            Some(Classification::Role(role)) => role,
            Some(Classification::Other) | None => self.fallback,
        };
        Route::Agent(role)
    }

    fn max_turns(&self) -> u32 {
        self.max_turns
    }

    fn fingerprint(&self) -> String {
        hex_digest(&format!(
            "classifier:{}|fallback:{}|max:{}",
            self.classifier.id(),
            self.fallback.tag(),
            self.max_turns
        ))
    }

    fn agents(&self) -> Vec<AgentRole> {
        let mut roles: BTreeSet<AgentRole> = self.classifier.roles().into_iter().collect();
        let _ = roles.insert(self.fallback);
        roles.into_iter().collect()
    }
}
