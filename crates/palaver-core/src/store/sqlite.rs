//! Relational store backed by SQLite.
//!
//! Schema:
//!
//! ```sql
//! conversations(id, user_id, started_at, ended_at, status)  -- status: active | completed
//! messages(id, conversation_id, role, content, timestamp)
//! ```
//!
//! A partial unique index on `conversations(user_id) WHERE status = 'active'`
//! enforces one active conversation per user at the database level.
//! Timestamps are RFC 3339 text. Blocking calls run on `spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::ConversationStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{Conversation, ConversationId, Message, Role, UserId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at   TEXT,
    status     TEXT NOT NULL DEFAULT 'active'
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_one_active
    ON conversations(user_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_conversations_user
    ON conversations(user_id, id);
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    timestamp       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, id);
";

const CONVERSATION_COLUMNS: &str = "c.id, c.started_at, c.ended_at, \
     (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened SQLite conversation store");
        Self::with_schema(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            f(&mut conn)
        })
        .await?
    }
}

type ConversationRow = (i64, String, Option<String>, i64);

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::backend("sqlite", format!("bad timestamp {raw:?}: {e}")))
}

fn to_conversation(user: &UserId, row: ConversationRow) -> StoreResult<Conversation> {
    let (id, started_at, ended_at, count) = row;
    Ok(Conversation {
        id,
        user: user.clone(),
        started_at: parse_time(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_time).transpose()?,
        message_count: usize::try_from(count).unwrap_or_default(),
    })
}

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn active_row(conn: &Connection, user: &UserId) -> StoreResult<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations c \
         WHERE c.user_id = ?1 AND c.status = 'active'"
    );
    Ok(conn
        .query_row(&sql, params![user.as_str()], read_conversation_row)
        .optional()?)
}

fn row_by_id(conn: &Connection, id: ConversationId) -> StoreResult<ConversationRow> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1");
    Ok(conn.query_row(&sql, params![id], read_conversation_row)?)
}

fn close_active(conn: &Connection, user: &UserId, now: &str) -> StoreResult<Option<ConversationId>> {
    let id: Option<ConversationId> = conn
        .query_row(
            "SELECT id FROM conversations WHERE user_id = ?1 AND status = 'active'",
            params![user.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = id {
        conn.execute(
            "UPDATE conversations SET status = 'completed', ended_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
    }
    Ok(id)
}

fn insert_conversation(conn: &Connection, user: &UserId, now: &str) -> StoreResult<ConversationId> {
    conn.execute(
        "INSERT INTO conversations (user_id, started_at, status) VALUES (?1, ?2, 'active')",
        params![user.as_str(), now],
    )?;
    Ok(conn.last_insert_rowid())
}

fn read_messages(conn: &Connection, id: ConversationId, limit: Option<usize>) -> StoreResult<Vec<Message>> {
    // Newest `limit` rows, re-ordered oldest first.
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare(
        "SELECT role, content, timestamp FROM ( \
             SELECT id, role, content, timestamp FROM messages \
             WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2 \
         ) ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![id, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(role, content, timestamp)| {
            Ok(Message {
                role: role
                    .parse::<Role>()
                    .map_err(|e| StoreError::backend("sqlite", e))?,
                content,
                timestamp: parse_time(&timestamp)?,
            })
        })
        .collect()
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn active_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>> {
        let user = user.clone();
        self.with_conn(move |conn| {
            active_row(conn, &user)?
                .map(|row| to_conversation(&user, row))
                .transpose()
        })
        .await
    }

    async fn open_conversation(&self, user: &UserId) -> StoreResult<Conversation> {
        let user = user.clone();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            close_active(&tx, &user, &now)?;
            let id = insert_conversation(&tx, &user, &now)?;
            let row = row_by_id(&tx, id)?;
            tx.commit()?;
            to_conversation(&user, row)
        })
        .await
    }

    async fn close_conversation(&self, user: &UserId) -> StoreResult<Option<Conversation>> {
        let user = user.clone();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            let closed = match close_active(&tx, &user, &now)? {
                Some(id) => Some(row_by_id(&tx, id)?),
                None => None,
            };
            tx.commit()?;
            closed.map(|row| to_conversation(&user, row)).transpose()
        })
        .await
    }

    async fn append_messages(
        &self,
        user: &UserId,
        messages: &[Message],
    ) -> StoreResult<Conversation> {
        let user = user.clone();
        let messages = messages.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = match active_row(&tx, &user)? {
                Some((id, ..)) => id,
                None => insert_conversation(&tx, &user, &Utc::now().to_rfc3339())?,
            };
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (conversation_id, role, content, timestamp) \
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for msg in &messages {
                    stmt.execute(params![
                        id,
                        msg.role.as_str(),
                        msg.content,
                        msg.timestamp.to_rfc3339()
                    ])?;
                }
            }
            let row = row_by_id(&tx, id)?;
            tx.commit()?;
            to_conversation(&user, row)
        })
        .await
    }

    async fn recent_messages(&self, user: &UserId, limit: usize) -> StoreResult<Vec<Message>> {
        let user = user.clone();
        self.with_conn(move |conn| match active_row(conn, &user)? {
            Some((id, ..)) => read_messages(conn, id, Some(limit)),
            None => Ok(Vec::new()),
        })
        .await
    }

    async fn conversations(&self, user: &UserId) -> StoreResult<Vec<Conversation>> {
        let user = user.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations c \
                 WHERE c.user_id = ?1 ORDER BY c.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user.as_str()], read_conversation_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|row| to_conversation(&user, row))
                .collect()
        })
        .await
    }

    async fn conversation_messages(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> StoreResult<Option<Vec<Message>>> {
        let user = user.clone();
        self.with_conn(move |conn| {
            let owned: Option<i64> = conn
                .query_row(
                    "SELECT id FROM conversations WHERE id = ?1 AND user_id = ?2",
                    params![id, user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match owned {
                Some(id) => read_messages(conn, id, None).map(Some),
                None => Ok(None),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_append_creates_active_conversation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let u = user("telegram:42");

        let conv = store
            .append_messages(&u, &[Message::user("q"), Message::assistant("a")])
            .await
            .unwrap();
        assert!(conv.is_active());
        assert_eq!(conv.message_count, 2);

        let active = store.active_conversation(&u).await.unwrap().unwrap();
        assert_eq!(active.id, conv.id);
    }

    #[tokio::test]
    async fn test_recent_messages_limit_keeps_newest() {
        let store = SqliteStore::open_in_memory().unwrap();
        let u = user("u");
        let msgs: Vec<Message> = (0..6).map(|i| Message::user(format!("m{i}"))).collect();
        store.append_messages(&u, &msgs).await.unwrap();

        let recent = store.recent_messages(&u, 4).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn test_open_marks_previous_completed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let u = user("u");
        let first = store.append_messages(&u, &[Message::user("one")]).await.unwrap();
        let second = store.open_conversation(&u).await.unwrap();
        assert_ne!(first.id, second.id);

        let convs = store.conversations(&u).await.unwrap();
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].id, second.id);
        assert_eq!(convs[1].status(), "completed");
        assert_eq!(convs[1].message_count, 1);

        let status: String = {
            let conn = store.conn.lock().unwrap();
            conn.query_row(
                "SELECT status FROM conversations WHERE id = ?1",
                params![first.id],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn test_close_without_active_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.close_conversation(&user("u")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_messages_scoped_to_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = user("a");
        let conv = store.append_messages(&a, &[Message::user("secret")]).await.unwrap();

        assert!(store
            .conversation_messages(&user("b"), conv.id)
            .await
            .unwrap()
            .is_none());
        let msgs = store.conversation_messages(&a, conv.id).await.unwrap().unwrap();
        assert_eq!(msgs[0].content, "secret");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("palaver.db");
        let u = user("telegram:42");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append_messages(&u, &[Message::user("kept")]).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let history = store.recent_messages(&u, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "kept");
        assert_eq!(history[0].role, Role::User);
    }
}
