use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, OrgId, ThreadId};
use crate::message::Message;

/// A stored thread row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub org_id: OrgId,
    pub title: Option<String>,
    pub model: String,
    /// Anonymous threads route personally-identifiable tool output
    /// through the anonymizer.
    pub anonymous: bool,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

/// A stored message row. `message` is the materialized turn; position in
/// the thread is the append order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Thread/message persistence port. The run loop assumes read-your-writes
/// consistency: a message it just appended is visible to the immediately
/// following read.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(
        &self,
        org_id: &OrgId,
        model: &str,
        anonymous: bool,
        locale: &str,
    ) -> Result<ThreadRecord, StoreError>;

    async fn thread(&self, id: &ThreadId) -> Result<ThreadRecord, StoreError>;

    async fn set_title(&self, id: &ThreadId, title: &str) -> Result<(), StoreError>;

    /// All messages of a thread in append order.
    async fn messages(&self, id: &ThreadId) -> Result<Vec<MessageRecord>, StoreError>;

    async fn append_message(
        &self,
        id: &ThreadId,
        message: Message,
    ) -> Result<MessageRecord, StoreError>;

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError>;
}
