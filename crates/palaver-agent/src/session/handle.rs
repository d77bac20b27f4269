use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use palaver_core::types::{ConversationId, UserId};
use palaver_providers::BackendConnection;

/// A live backend connection owned by the session manager.
pub(crate) struct Session {
    id: Uuid,
    user: UserId,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    conversation: Mutex<Option<ConversationId>>,
    connection: Box<dyn BackendConnection>,
}

/// Shared reference to an open session.
///
/// Cloning is cheap; every clone refers to the same session. The connection
/// itself stays private to the manager, which alone releases it.
#[derive(Clone)]
pub struct SessionHandle(Arc<Session>);

impl SessionHandle {
    pub(crate) fn new(
        user: UserId,
        connection: Box<dyn BackendConnection>,
        conversation: Option<ConversationId>,
    ) -> Self {
        let now = Utc::now();
        SessionHandle(Arc::new(Session {
            id: Uuid::new_v4(),
            user,
            created_at: now,
            last_activity: Mutex::new(now),
            conversation: Mutex::new(conversation),
            connection,
        }))
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn user(&self) -> &UserId {
        &self.0.user
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.0.last_activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active conversation this session records into, when known.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        *self.0.conversation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same open session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn touch(&self) {
        *self.0.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    pub(crate) fn set_conversation(&self, id: ConversationId) {
        *self.0.conversation.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub(crate) fn connection(&self) -> &dyn BackendConnection {
        self.0.connection.as_ref()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.0.id)
            .field("user", &self.0.user)
            .field("created_at", &self.0.created_at)
            .field("conversation", &self.conversation_id())
            .finish()
    }
}
