//! Core types for Palaver — users, transcript messages, and conversations.
//!
//! A `UserId` is an opaque key supplied by the chat interface. A
//! `Conversation` is a durable, ordered container of `Message`s with a start
//! and an optional end timestamp; at most one per user is active at a time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidUserId;

// ─────────────────────────────────────────────
// User identity
// ─────────────────────────────────────────────

/// Opaque user identity (e.g. `"telegram:12345"`, `"cli:default"`).
///
/// Never interpreted beyond validation: it must be non-blank and free of
/// control characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidUserId> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(InvalidUserId::Empty);
        }
        if raw.chars().any(char::is_control) {
            return Err(InvalidUserId::ControlCharacter);
        }
        Ok(UserId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = InvalidUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserId::parse(s)
    }
}

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// Who authored a transcript message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
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

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// An immutable, timestamped, role-tagged unit of conversational text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant-authored message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ─────────────────────────────────────────────
// Conversations
// ─────────────────────────────────────────────

/// Store-assigned conversation identifier.
pub type ConversationId = i64;

/// Summary of one conversation (messages are fetched separately).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub user: UserId,
    pub started_at: DateTime<Utc>,
    /// `None` while the conversation is active.
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: usize,
}

impl Conversation {
    /// Whether this conversation has not been closed yet.
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Status label matching the relational schema (`active` / `completed`).
    pub fn status(&self) -> &'static str {
        if self.is_active() {
            "active"
        } else {
            "completed"
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
