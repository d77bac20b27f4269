//! Telegram channel — long-polling bot built on `teloxide`.
//!
//! Every text message, commands included, goes onto the bus; the dispatcher
//! decides what to do with it. The session owner is the Telegram user id, so
//! `42` chatting in any group or DM is always `telegram:42`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatAction, ParseMode, UpdateKind};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use palaver_core::bus::{InboundMessage, MessageBus, OutboundMessage};

use crate::base::Channel;
use crate::formatting::{markdown_to_telegram_html, split_message};

/// Telegram message length limit.
const TELEGRAM_MAX_LEN: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u32 = 30;

pub struct TelegramChannel {
    bot: Bot,
    bus: Arc<MessageBus>,
    /// User ids or usernames allowed to talk to the bot. Empty allows all.
    allowed_users: Vec<String>,
    shutdown: Notify,
}

/// The parts of a Telegram text message the bus cares about.
#[derive(Debug, Clone)]
struct IncomingText<'a> {
    user_id: u64,
    username: Option<&'a str>,
    first_name: &'a str,
    chat_id: i64,
    message_id: i32,
    is_group: bool,
    text: &'a str,
}

impl IncomingText<'_> {
    fn into_inbound(self) -> InboundMessage {
        let mut inbound = InboundMessage::new(
            "telegram",
            self.user_id.to_string(),
            self.chat_id.to_string(),
            self.text,
        );
        let meta = &mut inbound.metadata;
        meta.insert("message_id".into(), self.message_id.to_string());
        meta.insert("first_name".into(), self.first_name.to_string());
        meta.insert("is_group".into(), self.is_group.to_string());
        if let Some(username) = self.username {
            meta.insert("username".into(), username.to_string());
        }
        inbound
    }
}

impl TelegramChannel {
    pub fn new(token: &str, bus: Arc<MessageBus>, allowed_users: Vec<String>) -> Self {
        Self {
            bot: Bot::new(token),
            bus,
            allowed_users,
            shutdown: Notify::new(),
        }
    }

    /// Whether the sender matches the allow-list by id or by username
    /// (with or without a leading `@`).
    fn is_allowed(&self, user_id: u64, username: Option<&str>) -> bool {
        if self.allowed_users.is_empty() {
            return true;
        }
        let id = user_id.to_string();
        self.allowed_users.iter().any(|allowed| {
            let allowed = allowed.trim_start_matches('@');
            allowed == id || username.is_some_and(|u| u.eq_ignore_ascii_case(allowed))
        })
    }

    async fn handle_update(&self, update: &Update) {
        let UpdateKind::Message(message) = &update.kind else {
            return;
        };
        let Some(user) = message.from.as_ref() else {
            return;
        };
        let Some(text) = message.text() else {
            debug!(chat = message.chat.id.0, "Ignoring non-text telegram message");
            return;
        };

        let incoming = IncomingText {
            user_id: user.id.0,
            username: user.username.as_deref(),
            first_name: &user.first_name,
            chat_id: message.chat.id.0,
            message_id: message.id.0,
            is_group: message.chat.is_group() || message.chat.is_supergroup(),
            text,
        };

        if !self.is_allowed(incoming.user_id, incoming.username) {
            warn!(user_id = incoming.user_id, chat = incoming.chat_id, "Telegram message from unauthorized user, ignoring");
            return;
        }

        debug!(user_id = incoming.user_id, chat = incoming.chat_id, len = text.len(), "Telegram inbound message");
        if let Err(e) = self
            .bot
            .send_chat_action(message.chat.id, ChatAction::Typing)
            .await
        {
            debug!(error = %e, "Failed to send typing indicator");
        }

        if let Err(e) = self.bus.publish_inbound(incoming.into_inbound()).await {
            error!(error = %e, "Failed to publish telegram message to bus");
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!("Starting telegram channel (long polling)");

        let commands = vec![
            BotCommand::new("new", "Start a new conversation"),
            BotCommand::new("history", "Show the current conversation"),
            BotCommand::new("conversations", "List your conversations"),
            BotCommand::new("help", "Show available commands"),
        ];
        if let Err(e) = self.bot.set_my_commands(commands).await {
            warn!(error = %e, "Failed to set bot commands menu");
        }

        let mut offset: i32 = 0;
        loop {
            tokio::select! {
                updates = self.bot.get_updates().offset(offset).timeout(POLL_TIMEOUT_SECS).send() => {
                    match updates {
                        Ok(updates) => {
                            for update in &updates {
                                offset = (update.id.0 as i32).wrapping_add(1);
                                self.handle_update(update).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Telegram polling error");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Telegram channel shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.notify_one();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let chat_id: i64 = msg
            .chat_id
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid telegram chat_id: {}", msg.chat_id))?;
        let chat = ChatId(chat_id);

        let html = markdown_to_telegram_html(&msg.content);
        for chunk in split_message(&html, TELEGRAM_MAX_LEN) {
            let sent = self
                .bot
                .send_message(chat, chunk)
                .parse_mode(ParseMode::Html)
                .await;
            if let Err(e) = sent {
                // Telegram rejected the markup; resend the whole reply as plain text.
                debug!(error = %e, "HTML send failed, retrying as plain text");
                for plain in split_message(&msg.content, TELEGRAM_MAX_LEN) {
                    self.bot.send_message(chat, plain).await?;
                }
                return Ok(());
            }
        }
        debug!(chat_id, "Telegram reply sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(
            "123:test-token",
            Arc::new(MessageBus::new(8)),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_empty_allow_list_allows_everyone() {
        assert!(channel(&[]).is_allowed(42, None));
    }

    #[test]
    fn test_allow_list_by_id_or_username() {
        let ch = channel(&["42", "@Analyst"]);
        assert!(ch.is_allowed(42, None));
        assert!(ch.is_allowed(7, Some("analyst")));
        assert!(!ch.is_allowed(7, Some("stranger")));
        assert!(!ch.is_allowed(7, None));
    }

    #[test]
    fn test_inbound_keys_user_by_sender() {
        let inbound = IncomingText {
            user_id: 42,
            username: Some("analyst"),
            first_name: "Ana",
            chat_id: -100_200,
            message_id: 9,
            is_group: true,
            text: "/history",
        }
        .into_inbound();

        assert_eq!(inbound.user_id().unwrap().as_str(), "telegram:42");
        assert_eq!(inbound.chat_id, "-100200");
        assert_eq!(inbound.content, "/history");
        assert_eq!(inbound.metadata["message_id"], "9");
        assert_eq!(inbound.metadata["username"], "analyst");

        let reply = OutboundMessage::reply_to(&inbound, "ok");
        assert_eq!(reply.reply_to.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_send_rejects_bad_chat_id() {
        let ch = channel(&[]);
        let err = ch
            .send(&OutboundMessage::new("telegram", "not-a-number", "hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid telegram chat_id"));
    }
}
