use palaver_core::error::{InvalidUserId, StoreError};
use palaver_providers::BackendError;

/// Everything the session manager reports to adapters.
///
/// Raw backend and storage errors are flattened into these kinds at the
/// manager boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The user identifier was empty or malformed. No state was touched.
    #[error("invalid user: {0}")]
    InvalidUser(#[from] InvalidUserId),

    /// A connection could not be acquired, or the in-flight call failed or timed out.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A durable write or read failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Text suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::InvalidUser(_) => "Sorry, I couldn't identify you.",
            SessionError::BackendUnavailable(_) => {
                "Sorry, I couldn't reach the assistant. Please try again, or send /new to start a fresh conversation."
            }
            SessionError::Storage(_) => "Sorry, I couldn't access your conversation history.",
        }
    }
}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        SessionError::BackendUnavailable(e.to_string())
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Storage(e.to_string())
    }
}
