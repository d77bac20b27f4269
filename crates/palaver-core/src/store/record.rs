//! Event-sourced transcript shared by the memory and JSONL stores.
//!
//! A user's transcript is the fold of a sequence of [`TranscriptEvent`]s. The
//! JSONL store writes exactly these events, one per line, so replaying a
//! file rebuilds the same state the memory store keeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Conversation, ConversationId, Message, Role, UserId};

/// One durable change to a user's transcript.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub(crate) enum TranscriptEvent {
    Opened {
        conversation: ConversationId,
        at: DateTime<Utc>,
    },
    Closed {
        conversation: ConversationId,
        at: DateTime<Utc>,
    },
    Message {
        conversation: ConversationId,
        role: Role,
        content: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Clone, Debug)]
struct StoredConversation {
    id: ConversationId,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    messages: Vec<Message>,
}

/// Folded state of every conversation one user has had.
#[derive(Clone, Debug)]
pub(crate) struct Transcript {
    user: UserId,
    conversations: Vec<StoredConversation>,
}

impl Transcript {
    pub(crate) fn new(user: UserId) -> Self {
        Transcript {
            user,
            conversations: Vec::new(),
        }
    }

    /// Fold one event in. Events that contradict the current state are
    /// skipped with a warning and `false` is returned.
    pub(crate) fn apply(&mut self, event: TranscriptEvent) -> bool {
        match event {
            TranscriptEvent::Opened { conversation, at } => {
                if self.conversations.iter().any(|c| c.id == conversation) {
                    warn!(user = %self.user, conversation, "Duplicate conversation open, skipping");
                    return false;
                }
                // A missing close record still must not leave two active.
                if let Some(prev) = self.active_mut() {
                    prev.ended_at = Some(at);
                }
                self.conversations.push(StoredConversation {
                    id: conversation,
                    started_at: at,
                    ended_at: None,
                    messages: Vec::new(),
                });
                true
            }
            TranscriptEvent::Closed { conversation, at } => {
                match self.conversations.iter_mut().find(|c| c.id == conversation) {
                    Some(conv) if conv.ended_at.is_none() => {
                        conv.ended_at = Some(at);
                        true
                    }
                    _ => {
                        warn!(user = %self.user, conversation, "Close for unknown or closed conversation, skipping");
                        false
                    }
                }
            }
            TranscriptEvent::Message {
                conversation,
                role,
                content,
                timestamp,
            } => match self.conversations.iter_mut().find(|c| c.id == conversation) {
                Some(conv) => {
                    conv.messages.push(Message {
                        role,
                        content,
                        timestamp,
                    });
                    true
                }
                None => {
                    warn!(user = %self.user, conversation, "Message for unknown conversation, skipping");
                    false
                }
            },
        }
    }

    /// Apply a batch produced by one of the `*_events` builders.
    pub(crate) fn apply_all(&mut self, events: Vec<TranscriptEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    fn active(&self) -> Option<&StoredConversation> {
        self.conversations.last().filter(|c| c.ended_at.is_none())
    }

    fn active_mut(&mut self) -> Option<&mut StoredConversation> {
        self.conversations
            .last_mut()
            .filter(|c| c.ended_at.is_none())
    }

    fn next_id(&self) -> ConversationId {
        self.conversations.last().map_or(1, |c| c.id + 1)
    }

    fn summarize(&self, conv: &StoredConversation) -> Conversation {
        Conversation {
            id: conv.id,
            user: self.user.clone(),
            started_at: conv.started_at,
            ended_at: conv.ended_at,
            message_count: conv.messages.len(),
        }
    }

    pub(crate) fn active_conversation(&self) -> Option<Conversation> {
        self.active().map(|c| self.summarize(c))
    }

    /// Events that close the active conversation (if any) and open the next.
    pub(crate) fn open_events(&self, now: DateTime<Utc>) -> Vec<TranscriptEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(active) = self.active() {
            events.push(TranscriptEvent::Closed {
                conversation: active.id,
                at: now,
            });
        }
        events.push(TranscriptEvent::Opened {
            conversation: self.next_id(),
            at: now,
        });
        events
    }

    pub(crate) fn close_events(&self, now: DateTime<Utc>) -> Vec<TranscriptEvent> {
        self.active()
            .map(|active| TranscriptEvent::Closed {
                conversation: active.id,
                at: now,
            })
            .into_iter()
            .collect()
    }

    /// Events that append `messages`, preceded by an open when no
    /// conversation is active.
    pub(crate) fn append_events(
        &self,
        messages: &[Message],
        now: DateTime<Utc>,
    ) -> Vec<TranscriptEvent> {
        let mut events = Vec::with_capacity(messages.len() + 1);
        let conversation = match self.active() {
            Some(active) => active.id,
            None => {
                let id = self.next_id();
                events.push(TranscriptEvent::Opened {
                    conversation: id,
                    at: now,
                });
                id
            }
        };
        events.extend(messages.iter().map(|m| TranscriptEvent::Message {
            conversation,
            role: m.role,
            content: m.content.clone(),
            timestamp: m.timestamp,
        }));
        events
    }

    pub(crate) fn recent_messages(&self, limit: usize) -> Vec<Message> {
        match self.active() {
            Some(active) => {
                let skip = active.messages.len().saturating_sub(limit);
                active.messages[skip..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn conversations(&self) -> Vec<Conversation> {
        self.conversations
            .iter()
            .rev()
            .map(|c| self.summarize(c))
            .collect()
    }

    pub(crate) fn conversation_messages(&self, id: ConversationId) -> Option<Vec<Message>> {
        self.conversations
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.messages.clone())
    }

    /// The most recently closed conversation, used to report what a close did.
    pub(crate) fn last_closed(&self) -> Option<Conversation> {
        self.conversations
            .iter()
            .rev()
            .find(|c| c.ended_at.is_some())
            .map(|c| self.summarize(c))
    }
}
