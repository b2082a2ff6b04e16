//! Shared types for the Zenith voice assistant.
//!
//! This crate holds the domain types that cross crate boundaries: conversation
//! turns and their roles, the lifecycle status of a real-time session, and the
//! voice profile definitions consumed by speech synthesis.
//!
//! It deliberately depends on nothing but `serde` and `thiserror`, so every
//! other crate in the workspace can use it without pulling in storage or
//! transport code.

pub mod voice;

pub use voice::{VoiceEngine, VoiceProfile};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant.
    User,
    /// The assistant's generated reply.
    Assistant,
}

impl Role {
    /// Returns the canonical lowercase name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known [`Role`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// One role-tagged message in a conversation.
///
/// Turns are immutable once appended. Within a session they are ordered by
/// `id`, which increases strictly with append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Storage-assigned, monotonically increasing identifier.
    pub id: i64,
    /// The conversational session this turn belongs to.
    pub session_id: String,
    /// Who said it.
    pub role: Role,
    /// The message text.
    pub message: String,
    /// Creation timestamp (RFC 3339, UTC).
    pub created_at: String,
}

/// Lifecycle status of a real-time session.
///
/// Only `Active` sessions live in the registry. `Ended` and `Expired` are
/// reported on the way out and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeStatus {
    Active,
    Ended,
    Expired,
}
