//! Palaver Core — shared types, configuration, message bus, and the
//! durable conversation stores.
//!
//! - **types**: users, messages, conversations
//! - **error**: storage and identifier errors
//! - **config**: JSON config schema + loader with env overrides
//! - **bus**: inbound/outbound message queue between channels and the dispatcher
//! - **store**: the `ConversationStore` trait and its memory / JSONL / SQLite backends

pub mod bus;
pub mod config;
pub mod error;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{InvalidUserId, StoreError, StoreResult};
pub use store::ConversationStore;
pub use types::{Conversation, ConversationId, Message, Role, UserId};
