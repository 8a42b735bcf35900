use super::traits::{Conversation, MessagePair, TranscriptError, TranscriptStore, UserRecord};
use crate::channels::{ChatId, UserProfile};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// SQLite-backed transcript store
///
/// One connection behind a mutex; every query runs on the blocking pool.
pub struct SqliteTranscriptStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    default_model: String,
}

impl From<rusqlite::Error> for TranscriptError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl SqliteTranscriptStore {
    pub fn new(db_path: &Path, default_model: &str) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path).context("SQLite failed to open database")?;

        // WAL: readers never block the writer; NORMAL sync is durable under WAL
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA temp_store   = MEMORY;",
        )?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
            default_model: default_model.to_string(),
        })
    }

    /// Initialize tables: users, conversations, `message_pairs`
    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id                       INTEGER PRIMARY KEY,
                chat_id                  INTEGER NOT NULL,
                username                 TEXT,
                first_name               TEXT NOT NULL DEFAULT '',
                last_name                TEXT,
                first_seen               TEXT NOT NULL,
                last_interaction         TEXT NOT NULL,
                current_conversation_id  TEXT REFERENCES conversations(id),
                selected_model           TEXT
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                mode        TEXT NOT NULL,
                model       TEXT NOT NULL,
                started_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

            -- Append-only; seq gives insertion order
            CREATE TABLE IF NOT EXISTS message_pairs (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                user_text        TEXT NOT NULL,
                bot_text         TEXT NOT NULL,
                created_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pairs_conversation ON message_pairs(conversation_id, seq);",
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, TranscriptError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, TranscriptError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| TranscriptError::Storage(format!("blocking task failed: {e}")))?
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc))
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let first_seen: String = row.get(5)?;
    let last_interaction: String = row.get(6)?;
    Ok(UserRecord {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        first_seen: parse_ts(&first_seen),
        last_interaction: parse_ts(&last_interaction),
        current_conversation_id: row.get(7)?,
        selected_model: row.get(8)?,
    })
}

const USER_COLUMNS: &str = "id, chat_id, username, first_name, last_name, first_seen, \
                            last_interaction, current_conversation_id, selected_model";

fn load_user(conn: &Connection, user_id: i64) -> Result<Option<UserRecord>, TranscriptError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![user_id], row_to_user)
        .optional()?)
}

/// Load a conversation with its last `limit` pairs (all when `None`), oldest first.
fn load_conversation(
    conn: &Connection,
    conversation_id: &str,
    limit: Option<usize>,
) -> Result<Option<Conversation>, TranscriptError> {
    let header = conn
        .query_row(
            "SELECT id, user_id, mode, model, started_at FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    let Some((id, user_id, mode, model, started_at)) = header else {
        return Ok(None);
    };

    // A negative LIMIT means no limit in SQLite.
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare(
        "SELECT user_text, bot_text, created_at FROM (
             SELECT seq, user_text, bot_text, created_at FROM message_pairs
             WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2
         ) ORDER BY seq ASC",
    )?;
    let messages = stmt
        .query_map(params![id, limit], |row| {
            let ts: String = row.get(2)?;
            Ok(MessagePair {
                user_text: row.get(0)?,
                bot_text: row.get(1)?,
                timestamp: parse_ts(&ts),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(Conversation {
        id,
        user_id,
        mode,
        model,
        started_at: parse_ts(&started_at),
        messages,
    }))
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_user(
        &self,
        profile: &UserProfile,
        chat_id: ChatId,
    ) -> Result<UserRecord, TranscriptError> {
        let profile = profile.clone();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, chat_id, username, first_name, last_name, first_seen, last_interaction)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    chat_id          = excluded.chat_id,
                    username         = excluded.username,
                    first_name       = excluded.first_name,
                    last_name        = excluded.last_name,
                    last_interaction = excluded.last_interaction",
                params![
                    profile.id,
                    chat_id,
                    profile.username,
                    profile.first_name,
                    profile.last_name,
                    now
                ],
            )?;
            load_user(conn, profile.id)?
                .ok_or_else(|| TranscriptError::Storage(format!("user {} vanished after upsert", profile.id)))
        })
        .await
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, TranscriptError> {
        self.with_conn(move |conn| load_user(conn, user_id)).await
    }

    async fn create_conversation(
        &self,
        user_id: i64,
        mode: &str,
        model: &str,
    ) -> Result<String, TranscriptError> {
        let id = Uuid::new_v4().to_string();
        let mode = mode.to_string();
        let model = model.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(TranscriptError::NotFound(format!("user {user_id}")));
            }
            tx.execute(
                "INSERT INTO conversations (id, user_id, mode, model, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, user_id, mode, model, now],
            )?;
            tx.execute(
                "UPDATE users SET current_conversation_id = ?1 WHERE id = ?2",
                params![id, user_id],
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, TranscriptError> {
        let id = conversation_id.to_string();
        self.with_conn(move |conn| load_conversation(conn, &id, None)).await
    }

    async fn get_recent_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Option<Conversation>, TranscriptError> {
        let id = conversation_id.to_string();
        self.with_conn(move |conn| load_conversation(conn, &id, Some(limit)))
            .await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        user_text: &str,
        bot_text: &str,
    ) -> Result<(), TranscriptError> {
        let id = conversation_id.to_string();
        let user_text = user_text.to_string();
        let bot_text = bot_text.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(TranscriptError::NotFound(format!("conversation {id}")));
            }
            conn.execute(
                "INSERT INTO message_pairs (conversation_id, user_text, bot_text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, user_text, bot_text, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_selected_model(&self, user_id: i64, model: &str) -> Result<(), TranscriptError> {
        let model = model.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET selected_model = ?1 WHERE id = ?2",
                params![model, user_id],
            )?;
            if changed == 0 {
                return Err(TranscriptError::NotFound(format!("user {user_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn get_selected_model(&self, user_id: i64) -> Result<String, TranscriptError> {
        let default_model = self.default_model.clone();
        self.with_conn(move |conn| {
            let selected: Option<Option<String>> = conn
                .query_row(
                    "SELECT selected_model FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(selected
                .flatten()
                .filter(|m| !m.is_empty())
                .unwrap_or(default_model))
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| Ok(conn.execute_batch("SELECT 1").is_ok()))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteTranscriptStore) {
        let tmp = TempDir::new().unwrap();
        let store =
            SqliteTranscriptStore::new(&tmp.path().join("transcripts.db"), "llama3.2").unwrap();
        (tmp, store)
    }

    fn profile(id: i64, first_name: &str) -> UserProfile {
        UserProfile {
            id,
            username: Some(format!("user{id}")),
            first_name: first_name.into(),
            last_name: None,
        }
    }

    #[tokio::test]
    async fn sqlite_name_and_health() {
        let (_tmp, store) = temp_store();
        assert_eq!(store.name(), "sqlite");
        assert!(store.health_check().await);
        assert!(store.db_path().ends_with("transcripts.db"));
    }

    #[tokio::test]
    async fn create_user_is_upsert() {
        let (_tmp, store) = temp_store();
        let first = store.create_user(&profile(1, "Ada"), 100).await.unwrap();
        assert!(first.current_conversation_id.is_none());

        let second = store.create_user(&profile(1, "Ada L."), 100).await.unwrap();
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_interaction >= first.last_interaction);
        assert_eq!(second.first_name, "Ada L.");
    }

    #[tokio::test]
    async fn create_conversation_repoints_current() {
        let (_tmp, store) = temp_store();
        store.create_user(&profile(1, "Ada"), 100).await.unwrap();

        let c1 = store
            .create_conversation(1, "assistant", "llama3.2")
            .await
            .unwrap();
        let c2 = store
            .create_conversation(1, "artist", "llama3.2")
            .await
            .unwrap();
        assert_ne!(c1, c2);

        let user = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.current_conversation_id.as_deref(), Some(c2.as_str()));
        let conv = store.get_conversation(&c2).await.unwrap().unwrap();
        assert_eq!(conv.mode, "artist");
        assert!(conv.messages.is_empty());
    }

    #[tokio::test]
    async fn create_conversation_for_unknown_user_fails() {
        let (_tmp, store) = temp_store();
        let err = store
            .create_conversation(42, "assistant", "llama3.2")
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptError::NotFound(_)));
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let (_tmp, store) = temp_store();
        store.create_user(&profile(1, "Ada"), 100).await.unwrap();
        let c = store
            .create_conversation(1, "assistant", "llama3.2")
            .await
            .unwrap();

        for i in 0..5 {
            store
                .append_message(&c, &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }

        let messages = store.list_messages(&c).await.unwrap();
        let users: Vec<_> = messages.iter().map(|m| m.user_text.as_str()).collect();
        assert_eq!(users, vec!["q0", "q1", "q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn recent_conversation_loads_only_the_tail() {
        let (_tmp, store) = temp_store();
        store.create_user(&profile(1, "Ada"), 100).await.unwrap();
        let c = store
            .create_conversation(1, "artist", "llama3.2")
            .await
            .unwrap();
        for i in 0..10 {
            store
                .append_message(&c, &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }

        let tail = store.get_recent_conversation(&c, 3).await.unwrap().unwrap();
        assert_eq!(tail.mode, "artist");
        let users: Vec<_> = tail.messages.iter().map(|m| m.user_text.as_str()).collect();
        assert_eq!(users, vec!["q7", "q8", "q9"]);

        assert!(store.recent_messages(&c, 0).await.unwrap().is_empty());
        assert_eq!(store.recent_messages(&c, 50).await.unwrap().len(), 10);
        assert!(store.get_recent_conversation("nope", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_is_not_found() {
        let (_tmp, store) = temp_store();
        let err = store.append_message("nope", "q", "a").await.unwrap_err();
        assert!(matches!(err, TranscriptError::NotFound(_)));
    }

    #[tokio::test]
    async fn selected_model_defaults_then_persists() {
        let (_tmp, store) = temp_store();
        assert_eq!(store.get_selected_model(1).await.unwrap(), "llama3.2");

        store.create_user(&profile(1, "Ada"), 100).await.unwrap();
        assert_eq!(store.get_selected_model(1).await.unwrap(), "llama3.2");

        store.set_selected_model(1, "mistral").await.unwrap();
        assert_eq!(store.get_selected_model(1).await.unwrap(), "mistral");

        let err = store.set_selected_model(99, "mistral").await.unwrap_err();
        assert!(matches!(err, TranscriptError::NotFound(_)));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.db");
        let conversation = {
            let store = SqliteTranscriptStore::new(&path, "llama3.2").unwrap();
            store.create_user(&profile(5, "Bo"), 5).await.unwrap();
            let c = store
                .create_conversation(5, "assistant", "llama3.2")
                .await
                .unwrap();
            store.append_message(&c, "hi", "hello").await.unwrap();
            c
        };

        let store = SqliteTranscriptStore::new(&path, "llama3.2").unwrap();
        let messages = store.list_messages(&conversation).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bot_text, "hello");
    }
}
