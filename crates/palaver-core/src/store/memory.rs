//! In-process store. Nothing survives a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::record::Transcript;
use super::ConversationStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{Conversation, ConversationId, Message, UserId};

#[derive(Default)]
pub struct MemoryStore {
    transcripts: RwLock<HashMap<UserId, Transcript>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn active_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>> {
        let map = self.transcripts.read().await;
        Ok(map.get(user).and_then(Transcript::active_conversation))
    }

    async fn open_conversation(&self, user: &UserId) -> StoreResult<Conversation> {
        let mut map = self.transcripts.write().await;
        let transcript = map
            .entry(user.clone())
            .or_insert_with(|| Transcript::new(user.clone()));
        let events = transcript.open_events(Utc::now());
        transcript.apply_all(events);
        transcript
            .active_conversation()
            .ok_or_else(|| StoreError::backend("memory", "open did not take effect"))
    }

    async fn close_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>> {
        let mut map = self.transcripts.write().await;
        let Some(transcript) = map.get_mut(user) else {
            return Ok(None);
        };
        let events = transcript.close_events(Utc::now());
        if events.is_empty() {
            return Ok(None);
        }
        transcript.apply_all(events);
        Ok(transcript.last_closed())
    }

    async fn append_messages(
        &self,
        user: &UserId,
        messages: &[Message],
    ) -> StoreResult<Conversation> {
        let mut map = self.transcripts.write().await;
        let transcript = map
            .entry(user.clone())
            .or_insert_with(|| Transcript::new(user.clone()));
        let events = transcript.append_events(messages, Utc::now());
        transcript.apply_all(events);
        transcript
            .active_conversation()
            .ok_or_else(|| StoreError::backend("memory", "append did not take effect"))
    }

    async fn recent_messages(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Message>> {
        let map = self.transcripts.read().await;
        Ok(map
            .get(user)
            .map(|t| t.recent_messages(limit))
            .unwrap_or_default())
    }

    async fn conversations(&self, user: &UserId) -> StoreResult<Vec<Conversation>> {
        let map = self.transcripts.read().await;
        Ok(map.get(user).map(Transcript::conversations).unwrap_or_default())
    }

    async fn conversation_messages(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> StoreResult<Option<Vec<Message>>> {
        let map = self.transcripts.read().await;
        Ok(map.get(user).and_then(|t| t.conversation_messages(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_user_is_empty() {
        let store = MemoryStore::new();
        let u = user("nobody");
        assert!(store.active_conversation(&u).await.unwrap().is_none());
        assert!(store.recent_messages(&u, 10).await.unwrap().is_empty());
        assert!(store.conversations(&u).await.unwrap().is_empty());
        assert!(store.close_conversation(&u).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_then_reopen() {
        let store = MemoryStore::new();
        let u = user("telegram:42");

        let conv = store
            .append_messages(&u, &[Message::user("q"), Message::assistant("a")])
            .await
            .unwrap();
        assert_eq!(conv.message_count, 2);

        let fresh = store.open_conversation(&u).await.unwrap();
        assert_ne!(fresh.id, conv.id);
        assert!(store.recent_messages(&u, 10).await.unwrap().is_empty());

        let old = store.conversation_messages(&u, conv.id).await.unwrap().unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(old[0].content, "q");
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = MemoryStore::new();
        let a = user("a");
        let b = user("b");
        store.append_messages(&a, &[Message::user("for a")]).await.unwrap();

        assert!(store.recent_messages(&b, 10).await.unwrap().is_empty());
        assert!(store.conversation_messages(&b, 1).await.unwrap().is_none());
    }
}
