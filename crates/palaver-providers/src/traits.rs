//! Backend traits — the seam between the session manager and whatever
//! produces replies.
//!
//! A [`Backend`] is a factory: `connect` hands out one live
//! [`BackendConnection`] per user session. A connection answers a [`Prompt`]
//! with a finite stream of text fragments and is released with `close`.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use palaver_core::types::{Message, Role, UserId};

/// Reply fragments in arrival order. Concatenated they form the full reply.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Errors raised by backends and their connections.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not hand out a connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Transport-level failure (DNS, TLS, reset, timeout).
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A streamed chunk could not be decoded.
    #[error("malformed stream chunk: {0}")]
    Decode(String),

    /// The connection was already released.
    #[error("connection closed")]
    Closed,
}

/// Everything a connection needs to produce one reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prompt {
    /// Optional instructions sent ahead of the conversation.
    pub system: Option<String>,
    /// Prior messages of the active conversation, oldest first.
    pub history: Vec<Message>,
    /// The new user text.
    pub text: String,
}

impl Prompt {
    pub fn new(text: impl Into<String>) -> Self {
        Prompt {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    /// Flatten history and the new text into one transcript:
    ///
    /// ```text
    /// User: How is ROAS computed?
    /// Assistant: Revenue divided by ad spend.
    ///
    /// User: And for a single campaign?
    /// ```
    ///
    /// Without history this is just the text.
    pub fn render(&self) -> String {
        if self.history.is_empty() {
            return self.text.clone();
        }
        let mut out = String::new();
        for msg in &self.history {
            let label = match msg.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&msg.content);
            out.push('\n');
        }
        out.push_str("\nUser: ");
        out.push_str(&self.text);
        out
    }
}

/// A factory for per-user backend connections.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Acquire a live connection for `user`.
    async fn connect(&self, user: &UserId) -> Result<Box<dyn BackendConnection>, BackendError>;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}

/// One user's live handle to the backend.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Dispatch a prompt. The returned stream is finite.
    async fn query(&self, prompt: &Prompt) -> Result<ReplyStream, BackendError>;

    /// Release the connection. Further queries fail with [`BackendError::Closed`].
    async fn close(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_history() {
        let prompt = Prompt::new("hello");
        assert_eq!(prompt.render(), "hello");
    }

    #[test]
    fn test_render_with_history() {
        let prompt = Prompt::new("And for one campaign?").with_history(vec![
            Message::user("How is ROAS computed?"),
            Message::assistant("Revenue divided by ad spend."),
        ]);
        assert_eq!(
            prompt.render(),
            "User: How is ROAS computed?\n\
             Assistant: Revenue divided by ad spend.\n\
             \n\
             User: And for one campaign?"
        );
    }

    #[test]
    fn test_status_error_display() {
        let err = BackendError::Status {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "backend returned 503: overloaded");
    }
}
