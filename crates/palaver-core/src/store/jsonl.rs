//! File-backed store: one append-only JSONL file per user.
//!
//! Each line is a [`TranscriptEvent`]. A user's file is replayed the first
//! time that user is touched and kept folded in memory afterwards. Writes go
//! to disk first and are applied to the cached transcript only once the
//! append succeeded, so a failed write leaves both views unchanged.
//!
//! Replay skips lines that are not valid UTF-8 or not valid JSON. When the
//! file ends in a torn line (no trailing newline), the next write starts
//! with a newline so the torn bytes never swallow a new event.
//!
//! At most `cache_capacity` transcripts stay cached; when a new user
//! arrives at capacity, transcripts nobody is using are evicted and will be
//! replayed from disk on next use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::record::{Transcript, TranscriptEvent};
use super::ConversationStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{Conversation, ConversationId, Message, UserId};
use crate::utils::encode_filename;

/// Default number of cached transcripts.
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// A user's replayed file.
struct Loaded {
    transcript: Transcript,
    /// The file's last line has no terminating newline.
    torn_tail: bool,
}

type Slot = Arc<tokio::sync::Mutex<Option<Loaded>>>;

pub struct JsonlStore {
    dir: PathBuf,
    slots: Mutex<HashMap<UserId, Slot>>,
    cache_capacity: usize,
}

impl JsonlStore {
    /// Create the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            slots: Mutex::new(HashMap::new()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        })
    }

    /// Keep at most `capacity` (minimum 1) transcripts cached.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn user_path(&self, user: &UserId) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", encode_filename(user.as_str())))
    }

    fn slot(&self, user: &UserId) -> StoreResult<Slot> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        if !slots.contains_key(user) && slots.len() >= self.cache_capacity {
            // Only the map holds an idle slot; in-use ones have a clone out.
            let before = slots.len();
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            debug!(evicted = before - slots.len(), "Evicted idle transcripts");
        }
        Ok(slots.entry(user.clone()).or_default().clone())
    }

    #[cfg(test)]
    fn cached_users(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Lock the user's transcript, replaying the file on first use.
    async fn locked(
        &self,
        user: &UserId,
    ) -> StoreResult<tokio::sync::OwnedMutexGuard<Option<Loaded>>> {
        let slot = self.slot(user)?;
        let mut guard = slot.lock_owned().await;
        if guard.is_none() {
            *guard = Some(self.replay(user).await?);
        }
        Ok(guard)
    }

    async fn replay(&self, user: &UserId) -> StoreResult<Loaded> {
        let path = self.user_path(user);
        let mut transcript = Transcript::new(user.clone());

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Loaded {
                    transcript,
                    torn_tail: false,
                })
            }
            Err(e) => return Err(e.into()),
        };

        for (line_num, raw) in bytes.split(|&b| b == b'\n').enumerate() {
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!(
                        line = line_num + 1,
                        error = %e,
                        path = %path.display(),
                        "Skipping transcript line with invalid UTF-8"
                    );
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptEvent>(line) {
                Ok(event) => {
                    transcript.apply(event);
                }
                Err(e) => {
                    warn!(
                        line = line_num + 1,
                        error = %e,
                        path = %path.display(),
                        "Skipping malformed transcript line"
                    );
                }
            }
        }

        let torn_tail = bytes.last().is_some_and(|&b| b != b'\n');
        if torn_tail {
            warn!(path = %path.display(), "Transcript ends in a torn line");
        }
        debug!(user = %user, path = %path.display(), "Replayed transcript");
        Ok(Loaded {
            transcript,
            torn_tail,
        })
    }

    /// Append events to the user's file as one write, then fold them into
    /// the cached transcript.
    async fn commit(
        &self,
        user: &UserId,
        state: &mut Loaded,
        events: Vec<TranscriptEvent>,
    ) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        if state.torn_tail {
            buf.push('\n');
        }
        for event in &events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }

        let path = self.user_path(user);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        state.torn_tail = false;
        state.transcript.apply_all(events);
        Ok(())
    }
}

/// Borrow the loaded state out of a slot guard.
fn loaded(guard: &mut Option<Loaded>) -> StoreResult<&mut Loaded> {
    guard
        .as_mut()
        .ok_or_else(|| StoreError::backend("jsonl", "transcript not loaded"))
}

#[async_trait]
impl ConversationStore for JsonlStore {
    fn backend_name(&self) -> &'static str {
        "jsonl"
    }

    async fn active_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>> {
        let mut guard = self.locked(user).await?;
        Ok(loaded(&mut guard)?.transcript.active_conversation())
    }

    async fn open_conversation(&self, user: &UserId) -> StoreResult<Conversation> {
        let mut guard = self.locked(user).await?;
        let state = loaded(&mut guard)?;
        let events = state.transcript.open_events(Utc::now());
        self.commit(user, state, events).await?;
        state
            .transcript
            .active_conversation()
            .ok_or_else(|| StoreError::backend("jsonl", "open did not take effect"))
    }

    async fn close_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>> {
        let mut guard = self.locked(user).await?;
        let state = loaded(&mut guard)?;
        let events = state.transcript.close_events(Utc::now());
        if events.is_empty() {
            return Ok(None);
        }
        self.commit(user, state, events).await?;
        Ok(state.transcript.last_closed())
    }

    async fn append_messages(
        &self,
        user: &UserId,
        messages: &[Message],
    ) -> StoreResult<Conversation> {
        let mut guard = self.locked(user).await?;
        let state = loaded(&mut guard)?;
        let events = state.transcript.append_events(messages, Utc::now());
        self.commit(user, state, events).await?;
        state
            .transcript
            .active_conversation()
            .ok_or_else(|| StoreError::backend("jsonl", "append did not take effect"))
    }

    async fn recent_messages(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Message>> {
        let mut guard = self.locked(user).await?;
        Ok(loaded(&mut guard)?.transcript.recent_messages(limit))
    }

    async fn conversations(&self, user: &UserId) -> StoreResult<Vec<Conversation>> {
        let mut guard = self.locked(user).await?;
        Ok(loaded(&mut guard)?.transcript.conversations())
    }

    async fn conversation_messages(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> StoreResult<Option<Vec<Message>>> {
        let mut guard = self.locked(user).await?;
        Ok(loaded(&mut guard)?.transcript.conversation_messages(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn store() -> (TempDir, JsonlStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_transcript_survives_reopen() {
        let (dir, store) = store();
        let u = user("telegram:42");
        store
            .append_messages(&u, &[Message::user("How is ROAS computed?"), Message::assistant("Revenue / spend.")])
            .await
            .unwrap();
        drop(store);

        let reopened = JsonlStore::new(dir.path()).unwrap();
        let history = reopened.recent_messages(&u, 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "How is ROAS computed?");
        assert_eq!(history[1].content, "Revenue / spend.");
    }

    #[tokio::test]
    async fn test_closed_conversation_is_kept() {
        let (dir, store) = store();
        let u = user("cli:default");
        store.append_messages(&u, &[Message::user("one")]).await.unwrap();
        let closed = store.close_conversation(&u).await.unwrap().unwrap();
        assert!(!closed.is_active());
        store.append_messages(&u, &[Message::user("two")]).await.unwrap();

        let reopened = JsonlStore::new(dir.path()).unwrap();
        let convs = reopened.conversations(&u).await.unwrap();
        assert_eq!(convs.len(), 2);
        assert!(convs[0].is_active());
        assert_eq!(convs[1].id, closed.id);
        assert!(convs[1].ended_at.is_some());

        let old = reopened
            .conversation_messages(&u, closed.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old[0].content, "one");
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (dir, store) = store();
        let u = user("u1");
        store.append_messages(&u, &[Message::user("kept")]).await.unwrap();
        drop(store);

        let path = dir.path().join("u1.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n\n");
        std::fs::write(&path, content).unwrap();

        let reopened = JsonlStore::new(dir.path()).unwrap();
        let history = reopened.recent_messages(&u, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "kept");
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let (dir, store) = store();
        let u = user("u1");
        store.append_messages(&u, &[Message::user("kept")]).await.unwrap();
        drop(store);

        // A multibyte character cut off mid-sequence.
        let path = dir.path().join("u1.jsonl");
        append_raw(&path, b"{\"_type\":\"message\",\"content\":\"caf\xC3\n");

        let reopened = JsonlStore::new(dir.path()).unwrap();
        let history = reopened.recent_messages(&u, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "kept");

        reopened.append_messages(&u, &[Message::user("café")]).await.unwrap();
        drop(reopened);
        let history = JsonlStore::new(dir.path())
            .unwrap()
            .recent_messages(&u, 10)
            .await
            .unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["kept", "café"]);
    }

    #[tokio::test]
    async fn test_write_after_torn_tail_survives_replay() {
        let (dir, store) = store();
        let u = user("u1");
        store.append_messages(&u, &[Message::user("one")]).await.unwrap();
        drop(store);

        let path = dir.path().join("u1.jsonl");
        append_raw(&path, b"{\"_type\":\"message\",\"conv");

        let reopened = JsonlStore::new(dir.path()).unwrap();
        reopened
            .append_messages(&u, &[Message::user("two"), Message::assistant("three")])
            .await
            .unwrap();
        assert_eq!(reopened.recent_messages(&u, 10).await.unwrap().len(), 3);
        drop(reopened);

        let history = JsonlStore::new(dir.path())
            .unwrap()
            .recent_messages(&u, 10)
            .await
            .unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_long_non_ascii_user_is_storable() {
        let (dir, store) = store();
        let long = user(&format!("slack:{}", "é".repeat(50)));
        let longer = user(&format!("slack:{}", "é".repeat(51)));
        store.append_messages(&long, &[Message::user("a")]).await.unwrap();
        store.append_messages(&longer, &[Message::user("b")]).await.unwrap();
        drop(store);

        let reopened = JsonlStore::new(dir.path()).unwrap();
        assert_eq!(reopened.recent_messages(&long, 10).await.unwrap()[0].content, "a");
        assert_eq!(reopened.recent_messages(&longer, 10).await.unwrap()[0].content, "b");
    }

    #[tokio::test]
    async fn test_idle_transcripts_are_evicted_at_capacity() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::new(dir.path()).unwrap().with_cache_capacity(2);
        for id in ["a", "b", "c"] {
            store.append_messages(&user(id), &[Message::user(id)]).await.unwrap();
        }
        assert!(store.cached_users() <= 2);

        // Unknown users do not pile up either.
        for i in 0..10 {
            assert!(store.recent_messages(&user(&format!("ghost{i}")), 10).await.unwrap().is_empty());
        }
        assert!(store.cached_users() <= 2);

        // Evicted transcripts come back from disk.
        assert_eq!(store.recent_messages(&user("a"), 10).await.unwrap()[0].content, "a");
    }

    #[tokio::test]
    async fn test_user_keys_map_to_distinct_files() {
        let (dir, store) = store();
        store.append_messages(&user("a:b"), &[Message::user("x")]).await.unwrap();
        store.append_messages(&user("a_b"), &[Message::user("y")]).await.unwrap();

        assert!(dir.path().join("a%3Ab.jsonl").exists());
        assert!(dir.path().join("a_b.jsonl").exists());
        assert_eq!(store.recent_messages(&user("a:b"), 10).await.unwrap()[0].content, "x");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let (dir, store) = store();
        let u = user("u2");
        store.append_messages(&u, &[Message::user("first")]).await.unwrap();

        // Replace the transcript file with a directory so appends fail.
        let path = dir.path().join("u2.jsonl");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = store.append_messages(&u, &[Message::user("lost")]).await;
        assert!(matches!(err, Err(StoreError::Io(_))));

        let history = store.recent_messages(&u, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "first");
    }
}
