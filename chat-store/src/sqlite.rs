//! SQLite storage backend for chat-store.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use chat_types::{
    AckKind, Conversation, ConversationId, ConversationKind, DeliveryStatus, Message, MessageId,
    Timestamp, UserId,
};

use crate::error::StoreError;
use crate::store::LocalStore;

/// SQLite-based local store.
///
/// Uses WAL mode for concurrent reads/writes. Acknowledgement and
/// tombstone sets are stored as JSON text columns.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("chatsync.db"))
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                delivered_to TEXT NOT NULL DEFAULT '[]',
                read_by TEXT NOT NULL DEFAULT '[]',
                deleted_by TEXT NOT NULL DEFAULT '[]',
                deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
                edited_at INTEGER,
                edit_history TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                participant_ids TEXT NOT NULL,
                last_message_text TEXT,
                last_message_at INTEGER,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
             ON messages(conversation_id, created_at, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_synced ON messages(synced, status)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put_message(&self, message: &Message, synced: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, text, created_at, status, synced,
                delivered_to, read_by, deleted_by, deleted_for_everyone,
                edited_at, edit_history
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                created_at = excluded.created_at,
                status = excluded.status,
                synced = excluded.synced,
                delivered_to = excluded.delivered_to,
                read_by = excluded.read_by,
                deleted_by = excluded.deleted_by,
                deleted_for_everyone = excluded.deleted_for_everyone,
                edited_at = excluded.edited_at,
                edit_history = excluded.edit_history
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(&message.text)
        .bind(message.created_at.as_millis() as i64)
        .bind(message.status.as_str())
        .bind(synced)
        .bind(encode_set(&message.delivered_to)?)
        .bind(encode_set(&message.read_by)?)
        .bind(encode_set(&message.deleted_by)?)
        .bind(message.deleted_for_everyone)
        .bind(message.edited_at.map(|t| t.as_millis() as i64))
        .bind(encode_history(&message.edit_history)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        tracing::debug!("stored message {} (synced: {})", message.id, synced);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
        synced: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM messages WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::Database)?;

        let current = current.ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let current = DeliveryStatus::parse(&current)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status: {current}")))?;

        let next = DeliveryStatus::merge(current, status);

        sqlx::query("UPDATE messages SET status = ?1, synced = ?2 WHERE id = ?3")
            .bind(next.as_str())
            .bind(synced)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;

        tracing::debug!("message {} status -> {}", id, next.as_str());
        Ok(())
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        row.as_ref().map(row_to_message).transpose()
    }

    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY created_at, id",
        )
        .bind(conversation.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn messages_before(
        &self,
        conversation: &ConversationId,
        before: Timestamp,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ?1 AND created_at < ?2 \
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )
        .bind(conversation.as_str())
        .bind(before.as_millis() as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn pending_messages(&self) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE synced = 0 OR status IN ('sending', 'error') \
             ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn apply_acks(
        &self,
        ids: &[MessageId],
        user: &UserId,
        kind: AckKind,
    ) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;
        let mut changed = 0u32;

        for id in ids {
            let row = sqlx::query("SELECT delivered_to, read_by FROM messages WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::Database)?;

            let Some(row) = row else { continue };

            let mut delivered: BTreeSet<UserId> =
                decode_set(&row.try_get::<String, _>("delivered_to")?)?;
            let mut read: BTreeSet<UserId> = decode_set(&row.try_get::<String, _>("read_by")?)?;

            let mut grew = delivered.insert(user.clone());
            if matches!(kind, AckKind::Read) {
                grew |= read.insert(user.clone());
            }
            if !grew {
                continue;
            }

            sqlx::query("UPDATE messages SET delivered_to = ?1, read_by = ?2 WHERE id = ?3")
                .bind(encode_set(&delivered)?)
                .bind(encode_set(&read)?)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Database)?;
            changed += 1;
        }

        tx.commit().await.map_err(StoreError::Database)?;

        if changed > 0 {
            tracing::debug!("applied {} ack rows for {}", changed, user);
        }
        Ok(changed)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn delete_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(conversation.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(conversation.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;

        tracing::debug!("deleted conversation {}", conversation);
        Ok(())
    }

    async fn put_conversation(
        &self,
        conversation: &Conversation,
        synced: bool,
    ) -> Result<(), StoreError> {
        let participants = serde_json::to_string(&conversation.participant_ids)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (
                id, kind, participant_ids, last_message_text, last_message_at,
                created_at, synced
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                participant_ids = excluded.participant_ids,
                last_message_text = excluded.last_message_text,
                last_message_at = excluded.last_message_at,
                synced = excluded.synced
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(conversation.kind.as_str())
        .bind(participants)
        .bind(conversation.last_message_text.as_deref())
        .bind(conversation.last_message_at.map(|t| t.as_millis() as i64))
        .bind(conversation.created_at.as_millis() as i64)
        .bind(synced)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        // The participant column is a JSON array; membership is filtered
        // here rather than in SQL. Local conversation lists are small.
        let rows = sqlx::query("SELECT * FROM conversations")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        let mut conversations: Vec<Conversation> = rows
            .iter()
            .map(row_to_conversation)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|c| c.participant_ids.contains(user))
            .collect();

        conversations.sort_by_key(|c| {
            std::cmp::Reverse(c.last_message_at.unwrap_or(c.created_at))
        });
        Ok(conversations)
    }

    async fn prune_older_than(&self, max_age: Duration) -> Result<u64, StoreError> {
        let cutoff = Timestamp::now()
            .as_millis()
            .saturating_sub(max_age.as_millis() as u64);

        let result = sqlx::query("DELETE FROM messages WHERE created_at < ?1 AND synced = 1")
            .bind(cutoff as i64)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(result.rows_affected())
    }
}

fn encode_set(set: &BTreeSet<UserId>) -> Result<String, StoreError> {
    serde_json::to_string(set).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_set(json: &str) -> Result<BTreeSet<UserId>, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn encode_history(history: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(history).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let edited_at: Option<i64> = row.try_get("edited_at")?;
    let edit_history: String = row.try_get("edit_history")?;

    Ok(Message {
        id: MessageId::parse(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid message id: {id}")))?,
        conversation_id: ConversationId::from_string(row.try_get::<String, _>("conversation_id")?),
        sender_id: UserId::new(row.try_get::<String, _>("sender_id")?),
        text: row.try_get("text")?,
        created_at: Timestamp::from_millis(row.try_get::<i64, _>("created_at")? as u64),
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status: {status}")))?,
        delivered_to: decode_set(&row.try_get::<String, _>("delivered_to")?)?,
        read_by: decode_set(&row.try_get::<String, _>("read_by")?)?,
        deleted_by: decode_set(&row.try_get::<String, _>("deleted_by")?)?,
        deleted_for_everyone: row.try_get("deleted_for_everyone")?,
        edited_at: edited_at.map(|t| Timestamp::from_millis(t as u64)),
        edit_history: serde_json::from_str(&edit_history)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
    })
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation, StoreError> {
    let kind: String = row.try_get("kind")?;
    let participants: String = row.try_get("participant_ids")?;
    let last_message_at: Option<i64> = row.try_get("last_message_at")?;

    Ok(Conversation {
        id: ConversationId::from_string(row.try_get::<String, _>("id")?),
        kind: ConversationKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown conversation kind: {kind}")))?,
        participant_ids: serde_json::from_str(&participants)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        last_message_text: row.try_get("last_message_text")?,
        last_message_at: last_message_at.map(|t| Timestamp::from_millis(t as u64)),
        created_at: Timestamp::from_millis(row.try_get::<i64, _>("created_at")? as u64),
    })
}
