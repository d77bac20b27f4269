//! Session manager — the registry of live backend connections keyed by user.
//!
//! # Locking
//!
//! The registry maps each user to a slot behind its own `tokio::sync::Mutex`.
//! The map itself sits behind a `std::sync::Mutex` that is held only long
//! enough to find or insert a slot, never across an `.await`. Every
//! operation that touches a user's session takes that user's slot lock, so:
//!
//! - two concurrent first messages from one user create one session;
//! - one user's exchanges run strictly one after another, from session
//!   acquisition through dispatch, reply collection and durable record;
//! - a reset issued while an exchange is in flight waits until that exchange
//!   (including its record) has finished, then closes the conversation.
//!
//! Different users never contend beyond the brief map lookup.
//!
//! # Cancellation
//!
//! Dropping an [`SessionManager::on_user_text`] future (e.g. on an adapter
//! timeout) abandons the reply stream and releases the slot lock. Nothing is
//! written before the full reply has been assembled, so the transcript gets
//! no partial entry, and the session stays open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use palaver_core::store::ConversationStore;
use palaver_core::types::{Conversation, ConversationId, Message, UserId};
use palaver_providers::Backend;

use super::error::SessionError;
use super::handle::SessionHandle;
use crate::context::ContextBuilder;

/// Session-manager tuning, normally taken from the `sessions` and `backend`
/// config sections.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Default `get_history` limit.
    pub history_limit: usize,
    /// Prior messages rendered into each prompt.
    pub context_messages: usize,
    pub system_prompt: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            context_messages: 10,
            system_prompt: None,
        }
    }
}

/// Result of a successful exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// The assembled assistant reply.
    pub reply: String,
    /// Set when the reply was produced but could not be recorded.
    pub storage_warning: Option<SessionError>,
}

/// A finite, restartable snapshot of messages, oldest first.
///
/// Iterating does not consume it; every `iter()` starts from the beginning.
#[derive(Clone, Debug, PartialEq)]
pub struct History {
    messages: Arc<[Message]>,
}

impl History {
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.to_vec()
    }
}

impl Default for History {
    fn default() -> Self {
        History::from(Vec::new())
    }
}

impl From<Vec<Message>> for History {
    fn from(messages: Vec<Message>) -> Self {
        History {
            messages: messages.into(),
        }
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One user's registry entry. `None` means no open session.
#[derive(Default)]
struct Slot {
    session: Option<SessionHandle>,
}

type SlotRef = Arc<tokio::sync::Mutex<Slot>>;

/// Owns every user's live backend connection and mediates all transcript
/// writes. Construct once at process start, call [`shutdown`](Self::shutdown)
/// before exit.
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    store: Arc<dyn ConversationStore>,
    context: ContextBuilder,
    history_limit: usize,
    slots: Mutex<HashMap<UserId, SlotRef>>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn ConversationStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            store,
            context: ContextBuilder::new(settings.system_prompt, settings.context_messages),
            history_limit: settings.history_limit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    // ────────────── Registry ──────────────

    fn slot(&self, user: &UserId) -> SlotRef {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(user.clone()).or_default().clone()
    }

    /// Drop the user's slot if it is empty and nobody else holds it.
    fn prune(&self, user: &UserId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = slots.get(user).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().is_ok_and(|guard| guard.session.is_none())
        });
        if idle {
            slots.remove(user);
        }
    }

    /// Return the open session or open one. Caller holds the slot lock.
    async fn ensure_session(
        &self,
        user: &UserId,
        slot: &mut Slot,
    ) -> Result<SessionHandle, SessionError> {
        if let Some(handle) = &slot.session {
            handle.touch();
            return Ok(handle.clone());
        }

        let connection = self.backend.connect(user).await.map_err(|e| {
            warn!(user = %user, backend = self.backend.display_name(), error = %e, "Backend connection failed");
            SessionError::from(e)
        })?;

        // A store fault must not keep the user from chatting; the first
        // recorded exchange opens the conversation if this step failed.
        let conversation = match self.ensure_conversation(user).await {
            Ok(conv) => Some(conv.id),
            Err(e) => {
                warn!(user = %user, error = %e, "Could not ensure an active conversation");
                None
            }
        };

        let handle = SessionHandle::new(user.clone(), connection, conversation);
        info!(user = %user, session = %handle.id(), conversation = ?conversation, "Session opened");
        slot.session = Some(handle.clone());
        Ok(handle)
    }

    async fn ensure_conversation(&self, user: &UserId) -> Result<Conversation, SessionError> {
        match self.store.active_conversation(user).await? {
            Some(conv) => Ok(conv),
            None => Ok(self.store.open_conversation(user).await?),
        }
    }

    /// Append one exchange. Caller holds the slot lock.
    async fn record_locked(
        &self,
        user: &UserId,
        slot: &Slot,
        user_msg: Message,
        assistant_msg: Message,
    ) -> Result<(), SessionError> {
        if let Some(handle) = &slot.session {
            handle.touch();
        }
        match self
            .store
            .append_messages(user, &[user_msg, assistant_msg])
            .await
        {
            Ok(conv) => {
                if let Some(handle) = &slot.session {
                    handle.set_conversation(conv.id);
                }
                debug!(user = %user, conversation = conv.id, messages = conv.message_count, "Exchange recorded");
                Ok(())
            }
            Err(e) => {
                warn!(user = %user, store = self.store.backend_name(), error = %e, "Failed to record exchange");
                Err(e.into())
            }
        }
    }

    // ────────────── Public operations ──────────────

    /// The user's open session, opening one (and an active conversation)
    /// when needed. Repeated calls return the same session until a reset.
    pub async fn get_or_create_session(&self, user: &UserId) -> Result<SessionHandle, SessionError> {
        let slot = self.slot(user);
        let result = {
            let mut guard = slot.lock().await;
            self.ensure_session(user, &mut guard).await
        };
        if result.is_err() {
            drop(slot);
            self.prune(user);
        }
        result
    }

    /// Release the user's session and close their active conversation.
    ///
    /// Release failures are logged and swallowed. Safe to call when no
    /// session is open. Waits for an in-flight exchange of the same user.
    pub async fn reset_session(&self, user: &UserId) -> Result<(), SessionError> {
        let slot = self.slot(user);
        let result = {
            let mut guard = slot.lock().await;
            if let Some(handle) = guard.session.take() {
                release(&handle).await;
            }
            match self.store.close_conversation(user).await {
                Ok(Some(conv)) => {
                    info!(user = %user, conversation = conv.id, messages = conv.message_count, "Conversation closed");
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => {
                    warn!(user = %user, error = %e, "Failed to close conversation");
                    Err(e.into())
                }
            }
        };
        drop(slot);
        self.prune(user);
        result
    }

    /// Append a user message then an assistant message to the active
    /// conversation, opening one if none exists.
    pub async fn record_exchange(
        &self,
        user: &UserId,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), SessionError> {
        let slot = self.slot(user);
        let result = {
            let guard = slot.lock().await;
            self.record_locked(
                user,
                &guard,
                Message::user(user_text),
                Message::assistant(assistant_text),
            )
            .await
        };
        // Recording alone does not open a session.
        drop(slot);
        self.prune(user);
        result
    }

    /// Up to `limit` (default: `history_limit`) most recent messages of the
    /// active conversation, oldest first. Empty for unknown users.
    pub async fn get_history(
        &self,
        user: &UserId,
        limit: Option<usize>,
    ) -> Result<History, SessionError> {
        let limit = limit.unwrap_or(self.history_limit);
        let messages = self.store.recent_messages(user, limit).await?;
        Ok(History::from(messages))
    }

    /// All of the user's conversations, newest first.
    pub async fn conversations(&self, user: &UserId) -> Result<Vec<Conversation>, SessionError> {
        Ok(self.store.conversations(user).await?)
    }

    /// Messages of one past or active conversation; `None` if the id is not
    /// one of the user's.
    pub async fn conversation_messages(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> Result<Option<History>, SessionError> {
        Ok(self
            .store
            .conversation_messages(user, id)
            .await?
            .map(History::from))
    }

    /// Full exchange for one user message: session, prompt from history,
    /// dispatch, reply assembly, durable record.
    ///
    /// A storage failure while recording does not fail the exchange; it is
    /// returned as [`ExchangeOutcome::storage_warning`] next to the reply.
    pub async fn on_user_text(
        &self,
        user: &UserId,
        text: &str,
    ) -> Result<ExchangeOutcome, SessionError> {
        let slot = self.slot(user);
        let mut guard = slot.lock().await;
        let session = match self.ensure_session(user, &mut guard).await {
            Ok(session) => session,
            Err(e) => {
                drop(guard);
                drop(slot);
                self.prune(user);
                return Err(e);
            }
        };

        let history = match self
            .store
            .recent_messages(user, self.context.context_messages())
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(user = %user, error = %e, "Could not load history, sending without context");
                Vec::new()
            }
        };

        let user_msg = Message::user(text);
        let prompt = self.context.build_prompt(history, text);

        let mut stream = session.connection().query(&prompt).await.map_err(|e| {
            warn!(user = %user, error = %e, "Backend query failed");
            SessionError::from(e)
        })?;

        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|e| {
                warn!(user = %user, error = %e, "Reply stream failed");
                SessionError::from(e)
            })?;
            reply.push_str(&fragment);
        }
        drop(stream);

        if reply.trim().is_empty() {
            warn!(user = %user, "Backend returned an empty reply");
            return Err(SessionError::BackendUnavailable(
                "backend returned an empty reply".to_string(),
            ));
        }

        let assistant_msg = Message::assistant(reply.clone());
        let storage_warning = self
            .record_locked(user, &guard, user_msg, assistant_msg)
            .await
            .err();

        Ok(ExchangeOutcome {
            reply,
            storage_warning,
        })
    }

    #[cfg(test)]
    fn registry_len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of users with an open session.
    pub async fn open_sessions(&self) -> usize {
        let slots: Vec<SlotRef> = {
            let map = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            map.values().cloned().collect()
        };
        let mut open = 0;
        for slot in slots {
            if slot.lock().await.session.is_some() {
                open += 1;
            }
        }
        open
    }

    /// Release every open session and empty the registry. Release errors
    /// are logged, never returned. The manager stays usable afterwards.
    pub async fn shutdown(&self) {
        let slots: Vec<(UserId, SlotRef)> = {
            let map = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            map.iter().map(|(u, s)| (u.clone(), s.clone())).collect()
        };

        let mut released = 0usize;
        for (_, slot) in &slots {
            let handle = slot.lock().await.session.take();
            if let Some(handle) = handle {
                release(&handle).await;
                released += 1;
            }
        }
        let users: Vec<UserId> = slots.into_iter().map(|(u, _)| u).collect();
        for user in &users {
            self.prune(user);
        }
        info!(released, "Session manager shut down");
    }
}

/// Close a session's connection, logging instead of failing.
async fn release(handle: &SessionHandle) {
    match handle.connection().close().await {
        Ok(()) => debug!(user = %handle.user(), session = %handle.id(), "Session released"),
        Err(e) => warn!(user = %handle.user(), session = %handle.id(), error = %e, "Session release failed"),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
