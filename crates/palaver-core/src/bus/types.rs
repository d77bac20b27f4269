//! Bus event types — messages flowing between chat channels and the dispatcher.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::InvalidUserId;
use crate::types::UserId;

/// A user message arriving from a channel.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat the reply must be routed back to.
    pub chat_id: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Channel-specific metadata (e.g. message_id, username).
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Session owner: channel plus sender (e.g. "telegram:12345").
    ///
    /// Keyed by sender rather than chat so that two people in one group chat
    /// keep separate conversations.
    pub fn user_id(&self) -> Result<UserId, InvalidUserId> {
        UserId::parse(format!("{}:{}", self.channel, self.sender_id))
    }
}

/// A reply travelling from the dispatcher back to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            metadata: HashMap::new(),
        }
    }

    /// Build a reply addressed to the chat an inbound message came from.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        let mut out = OutboundMessage::new(&inbound.channel, &inbound.chat_id, content);
        out.reply_to = inbound.metadata.get("message_id").cloned();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("telegram", "42", "chat_99", "How is ROAS computed?");

        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.chat_id, "chat_99");
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_user_id_uses_sender() {
        let msg = InboundMessage::new("telegram", "42", "group_1", "hi");
        assert_eq!(msg.user_id().unwrap().as_str(), "telegram:42");
    }

    #[test]
    fn test_user_id_rejects_control_chars() {
        let msg = InboundMessage::new("cli", "bad\u{7}", "default", "hi");
        assert!(msg.user_id().is_err());
    }

    #[test]
    fn test_reply_to_inbound() {
        let mut inbound = InboundMessage::new("telegram", "42", "chat_99", "hi");
        inbound
            .metadata
            .insert("message_id".to_string(), "777".to_string());

        let out = OutboundMessage::reply_to(&inbound, "hello");
        assert_eq!(out.channel, "telegram");
        assert_eq!(out.chat_id, "chat_99");
        assert_eq!(out.content, "hello");
        assert_eq!(out.reply_to.as_deref(), Some("777"));
    }
}
