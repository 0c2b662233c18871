//! Append-only, per-conversation ordered message log.
//!
//! Identifiers and timestamps are assigned here and nowhere else. Within a
//! conversation, timestamps never go backwards and listing orders by
//! `(timestamp, id)`, so replay order matches append order.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use shared::models::{ConversationKey, MessageId, Timestamp};

use super::StoreError;

/// A message row as persisted, before sender resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation: ConversationKey,
    pub sender_id: String,
    pub content: String,
    pub timestamp: Timestamp,
    /// Storage compatibility flag; no flow updates it.
    pub read: bool,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message, assigning its id and timestamp.
    async fn append(
        &self,
        conversation: &ConversationKey,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Full replay of a conversation, oldest first.
    async fn list_by_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Cheap round trip used by readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation: String,
    sender_id: String,
    content: String,
    created_at: DateTime<Utc>,
    read: bool,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let conversation = ConversationKey::parse(&row.conversation)
            .map_err(|err| StoreError::Unavailable(format!("corrupt row {}: {err}", row.id)))?;
        Ok(Self {
            id: row.id,
            conversation,
            sender_id: row.sender_id,
            content: row.content,
            timestamp: Timestamp(row.created_at),
            read: row.read,
        })
    }
}

/// Postgres-backed log using the `chat_messages` procedures.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    #[instrument(skip(self, content), fields(conversation = %conversation))]
    async fn append(
        &self,
        conversation: &ConversationKey,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation, sender_id, content, created_at, read FROM append_chat_message($1, $2, $3)",
        )
        .bind(conversation.as_str())
        .bind(sender_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        debug!(message_id = row.id, "message appended");
        row.try_into()
    }

    #[instrument(skip(self), fields(conversation = %conversation))]
    async fn list_by_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation, sender_id, content, created_at, read FROM list_chat_messages($1)",
        )
        .bind(conversation.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 FROM chat_messages LIMIT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    next_id: MessageId,
    conversations: HashMap<ConversationKey, Vec<StoredMessage>>,
}

/// Process-local log for tests and database-less development.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    log: Mutex<MemoryLog>,
    offline: AtomicBool,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of messages stored across all conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log
            .lock()
            .map(|log| log.conversations.values().map(Vec::len).sum())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(
        &self,
        conversation: &ConversationKey,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        self.check_online()?;
        let mut log = self
            .log
            .lock()
            .map_err(|_| StoreError::Unavailable("message log poisoned".into()))?;

        log.next_id += 1;
        let id = log.next_id;
        let entries = log.conversations.entry(conversation.clone()).or_default();
        let now = Timestamp::now();
        let timestamp = entries
            .last()
            .map_or(now, |last| last.timestamp.max(now));

        let message = StoredMessage {
            id,
            conversation: conversation.clone(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            timestamp,
            read: false,
        };
        entries.push(message.clone());
        Ok(message)
    }

    async fn list_by_conversation(
        &self,
        conversation: &ConversationKey,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.check_online()?;
        let log = self
            .log
            .lock()
            .map_err(|_| StoreError::Unavailable("message log poisoned".into()))?;
        Ok(log
            .conversations
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}
