//! Roles and appended messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A role that can take a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentRole {
    /// The customer describing what they want built.
    #[serde(rename = "customer")]
    Customer,
    /// The frontend developer.
    #[serde(rename = "fe")]
    FrontendDeveloper,
    /// The business analyst.
    #[serde(rename = "ba")]
    BusinessAnalyst,
}

impl AgentRole {
    /// Every agent role, in declaration order.
    pub const ALL: [AgentRole; 3] = [
        AgentRole::Customer,
        AgentRole::FrontendDeveloper,
        AgentRole::BusinessAnalyst,
    ];

    /// Stable wire tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::FrontendDeveloper => "fe",
            Self::BusinessAnalyst => "ba",
        }
    }

    /// Human-readable label used in transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Customer => "Customer",
            Self::FrontendDeveloper => "FE Dev",
            Self::BusinessAnalyst => "Business Analyst",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when a role name is not recognized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for AgentRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "fe" | "frontenddeveloper" | "frontend engineer" => Ok(Self::FrontendDeveloper),
            "ba" | "businessanalyst" | "business analyst" => Ok(Self::BusinessAnalyst),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

/// Author of a message: the external user or one of the agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// The external caller.
    User,
    /// An agent.
    Agent(AgentRole),
}

impl Role {
    /// Stable wire tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent(role) => role.tag(),
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Agent(role) => role.label(),
        }
    }

    /// Whether this is the external user.
    pub fn is_user(self) -> bool {
        matches!(self, Self::User)
    }

    /// The agent role, if any.
    pub fn agent(self) -> Option<AgentRole> {
        match self {
            Self::User => None,
            Self::Agent(role) => Some(role),
        }
    }
}

impl From<AgentRole> for Role {
    fn from(role: AgentRole) -> Self {
        Self::Agent(role)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("user") {
            return Ok(Self::User);
        }
        s.parse().map(Self::Agent)
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.tag().to_owned()
    }
}

/// One appended message. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    sequence_id: u64,
    turn_index: u32,
    role: Role,
    content: String,
    created_at: String,
}

impl Message {
    /// Build a message from already-normalized parts.
    ///
    /// Used by the message store on append and by checkpoint stores when
    /// decoding persisted rows.
    pub fn new(
        sequence_id: u64,
        turn_index: u32,
        role: Role,
        content: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            sequence_id,
            turn_index,
            role,
            content: content.into(),
            created_at: created_at.into(),
        }
    }

    /// Position in the thread, gap-free from 0.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Router turn at which the message was produced.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }

    /// Author.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Canonical text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// RFC 3339 append timestamp.
    pub fn created_at(&self) -> &str {
        &self.created_at
    }
}
