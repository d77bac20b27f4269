//! Chat commands shared by every channel.
//!
//! | Command                | Effect                                            |
//! |------------------------|---------------------------------------------------|
//! | `/start`, `/help`      | greeting / command list                           |
//! | `/new`                 | reset the session, start a new conversation       |
//! | `/history [id]`        | previews of the active (or a past) conversation   |
//! | `/conversations`       | list past conversations                           |
//! | `/quit`, `/exit`       | leave the REPL (ignored by chat channels)         |

use palaver_core::types::{ConversationId, Message, Role, UserId};
use palaver_core::utils::truncate_string;

use crate::session::{SessionError, SessionManager};

/// Characters of each message shown by `/history`.
const PREVIEW_CHARS: usize = 100;

/// A parsed slash command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    New,
    History(Option<ConversationId>),
    Conversations,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse a message starting with `/`. Plain text yields `None`.
    ///
    /// A Telegram-style `@botname` suffix on the command is ignored.
    pub fn parse(text: &str) -> Option<Command> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let mut parts = trimmed.split_whitespace();
        let head = parts.next().unwrap_or(trimmed);
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        let command = match name.as_str() {
            "/start" => Command::Start,
            "/help" => Command::Help,
            "/new" | "/reset" => Command::New,
            "/history" => Command::History(parts.next().and_then(|id| id.parse().ok())),
            "/conversations" => Command::Conversations,
            "/quit" | "/exit" => Command::Quit,
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}

pub const HELP_TEXT: &str = "Commands:\n\
    /new — start a new conversation\n\
    /history — show the current conversation\n\
    /history <id> — show a past conversation\n\
    /conversations — list your conversations\n\
    /help — show this message\n\n\
    Anything else is sent to the assistant.";

/// Execute a command for `user` and return the text to show them.
///
/// `Quit` only makes sense in the REPL, which intercepts it first.
pub async fn execute(
    manager: &SessionManager,
    user: &UserId,
    command: &Command,
) -> Result<String, SessionError> {
    match command {
        Command::Start => Ok(format!(
            "Hi! I'm your assistant. Send me a message to get started.\n\n{HELP_TEXT}"
        )),
        Command::Help => Ok(HELP_TEXT.to_string()),
        Command::New => {
            manager.reset_session(user).await?;
            Ok("Started a new conversation. Previous messages are saved; see /conversations.".to_string())
        }
        Command::History(None) => {
            let history = manager.get_history(user, None).await?;
            if history.is_empty() {
                return Ok("No messages in the current conversation yet.".to_string());
            }
            Ok(format!(
                "Current conversation ({} messages):\n\n{}",
                history.len(),
                format_previews(history.iter())
            ))
        }
        Command::History(Some(id)) => match manager.conversation_messages(user, *id).await? {
            Some(history) if history.is_empty() => Ok(format!("Conversation {id} has no messages.")),
            Some(history) => Ok(format!(
                "Conversation {id} ({} messages):\n\n{}",
                history.len(),
                format_previews(history.iter())
            )),
            None => Ok(format!("No conversation with id {id}.")),
        },
        Command::Conversations => {
            let conversations = manager.conversations(user).await?;
            if conversations.is_empty() {
                return Ok("No conversations yet.".to_string());
            }
            let mut out = String::from("Your conversations:\n");
            for conv in &conversations {
                let ended = match conv.ended_at {
                    Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
                    None => "active".to_string(),
                };
                out.push_str(&format!(
                    "\n#{} — {} → {} ({} messages)",
                    conv.id,
                    conv.started_at.format("%Y-%m-%d %H:%M"),
                    ended,
                    conv.message_count
                ));
            }
            Ok(out)
        }
        Command::Quit => Ok("Goodbye!".to_string()),
        Command::Unknown(name) => Ok(format!("Unknown command {name}. Try /help.")),
    }
}

/// `You: …` / `Agent: …` lines, each truncated to a preview.
pub fn format_previews<'a>(messages: impl IntoIterator<Item = &'a Message>) -> String {
    messages
        .into_iter()
        .map(|m| {
            let label = match m.role {
                Role::User => "You",
                Role::Assistant => "Agent",
            };
            format!("{label}: {}", truncate_string(&m.content, PREVIEW_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
