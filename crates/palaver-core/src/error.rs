//! Error types for the core crate.

/// A user identifier failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUserId {
    #[error("user identifier is empty")]
    Empty,
    #[error("user identifier contains control characters")]
    ControlCharacter,
}

/// Error type for conversation store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File-system failure (JSONL store, database file creation).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of a transcript record failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage backend reported an error.
    #[error("[{backend}] {message}")]
    Backend {
        /// Backend identifier (e.g. `"sqlite"`).
        backend: &'static str,
        message: String,
    },

    /// A storage mutex was poisoned by a panic.
    #[error("lock: {0}")]
    Lock(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("task: {0}")]
    Task(String),
}

impl StoreError {
    /// Create a backend-scoped error.
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::backend("sqlite", e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = StoreError::backend("sqlite", "disk full");
        assert_eq!(err.to_string(), "[sqlite] disk full");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn test_sqlite_error_converts() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(err.to_string().starts_with("[sqlite]"));
    }
}
