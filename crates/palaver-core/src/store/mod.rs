//! Durable conversation storage.
//!
//! [`ConversationStore`] is the one capability the session manager needs from
//! persistence. Three implementations are selected by `storage.backend`:
//!
//! | Backend  | Type                | Durability                          |
//! |----------|---------------------|-------------------------------------|
//! | `memory` | [`MemoryStore`]     | process lifetime                    |
//! | `jsonl`  | [`JsonlStore`]      | one append-only file per user       |
//! | `sqlite` | [`SqliteStore`]     | `conversations` + `messages` tables |
//!
//! Every backend upholds the same invariants: at most one active
//! conversation per user, opening a conversation closes the previous one
//! (sets `ended_at`, never deletes), and messages keep insertion order.

mod jsonl;
mod memory;
mod record;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StoreResult;
use crate::types::{Conversation, ConversationId, Message, UserId};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistence for per-user conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Short backend name for logs and `palaver status`.
    fn backend_name(&self) -> &'static str;

    /// The user's unterminated conversation, if any.
    async fn active_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>>;

    /// Start a new conversation, closing the active one first.
    async fn open_conversation(&self, user: &UserId) -> StoreResult<Conversation>;

    /// Close the active conversation. Returns it, or `None` when there was none.
    async fn close_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>>;

    /// Append messages, in order, to the active conversation, opening one
    /// when none exists. Either every message is stored or none is.
    async fn append_messages(
        &self,
        user: &UserId,
        messages: &[Message],
    ) -> StoreResult<Conversation>;

    /// Up to `limit` most recent messages of the active conversation, oldest first.
    async fn recent_messages(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Message>>;

    /// All of the user's conversations, newest first.
    async fn conversations(&self, user: &UserId) -> StoreResult<Vec<Conversation>>;

    /// Messages of one of the user's conversations, or `None` if the id is
    /// unknown for that user.
    async fn conversation_messages(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> StoreResult<Option<Vec<Message>>>;
}

/// Build the configured store.
pub fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Jsonl => Arc::new(JsonlStore::new(config.resolved_path())?),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(config.resolved_path())?),
    };
    info!(backend = store.backend_name(), "Conversation store ready");
    Ok(store)
}
