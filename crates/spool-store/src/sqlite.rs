use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use spool_core::ids::{MessageId, OrgId, ThreadId};
use spool_core::message::Message;
use spool_core::store::{MessageRecord, StoreError, ThreadRecord, ThreadStore};

use crate::database::Database;
use crate::row_helpers;

/// SQLite-backed implementation of the thread/message store port.
/// One connection behind a mutex; every call locks for its duration, so
/// a run observes its own writes on the next read.
pub struct SqliteThreadStore {
    db: Database,
}

impl SqliteThreadStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn thread_from_row(row: &rusqlite::Row<'_>) -> Result<ThreadRecord, StoreError> {
        let id: String = row_helpers::get(row, 0, "threads", "id")?;
        let org_id: String = row_helpers::get(row, 1, "threads", "org_id")?;
        let title: Option<String> = row_helpers::get_opt(row, 2, "threads", "title")?;
        let model: String = row_helpers::get(row, 3, "threads", "model")?;
        let anonymous: bool = row_helpers::get(row, 4, "threads", "anonymous")?;
        let locale: String = row_helpers::get(row, 5, "threads", "locale")?;
        let created_at: String = row_helpers::get(row, 6, "threads", "created_at")?;

        Ok(ThreadRecord {
            id: ThreadId::from_raw(id),
            org_id: OrgId::from_raw(org_id),
            title,
            model,
            anonymous,
            locale,
            created_at: row_helpers::parse_timestamp(&created_at, "threads", "created_at")?,
        })
    }

    fn message_from_row(row: &rusqlite::Row<'_>) -> Result<MessageRecord, StoreError> {
        let id: String = row_helpers::get(row, 0, "messages", "id")?;
        let thread_id: String = row_helpers::get(row, 1, "messages", "thread_id")?;
        let payload: String = row_helpers::get(row, 2, "messages", "payload")?;
        let created_at: String = row_helpers::get(row, 3, "messages", "created_at")?;

        Ok(MessageRecord {
            id: MessageId::from_raw(id),
            thread_id: ThreadId::from_raw(thread_id),
            message: row_helpers::parse_payload(&payload, "messages", "payload")?,
            created_at: row_helpers::parse_timestamp(&created_at, "messages", "created_at")?,
        })
    }
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    #[instrument(skip(self))]
    async fn create_thread(
        &self,
        org_id: &OrgId,
        model: &str,
        anonymous: bool,
        locale: &str,
    ) -> Result<ThreadRecord, StoreError> {
        let record = ThreadRecord {
            id: ThreadId::new(),
            org_id: org_id.clone(),
            title: None,
            model: model.to_string(),
            anonymous,
            locale: locale.to_string(),
            created_at: Utc::now(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO threads (id, org_id, title, model, anonymous, locale, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    record.id.as_str(),
                    record.org_id.as_str(),
                    record.model,
                    record.anonymous,
                    record.locale,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(())
        })?;

        Ok(record)
    }

    async fn thread(&self, id: &ThreadId) -> Result<ThreadRecord, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, org_id, title, model, anonymous, locale, created_at
                 FROM threads WHERE id = ?1",
                [id.as_str()],
                |row| Ok(Self::thread_from_row(row)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::ThreadNotFound(id.clone()),
                other => StoreError::Database(other.to_string()),
            })?
        })
    }

    async fn set_title(&self, id: &ThreadId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![title, Utc::now().to_rfc3339(), id.as_str()],
                )
                .map_err(|e| StoreError::Database(e.to_string()))?;
            if changed == 0 {
                return Err(StoreError::ThreadNotFound(id.clone()));
            }
            Ok(())
        })
    }

    async fn messages(&self, id: &ThreadId) -> Result<Vec<MessageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, thread_id, payload, created_at
                     FROM messages WHERE thread_id = ?1 ORDER BY position ASC",
                )
                .map_err(|e| StoreError::Database(e.to_string()))?;

            let rows = stmt
                .query_map([id.as_str()], |row| Ok(Self::message_from_row(row)))
                .map_err(|e| StoreError::Database(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|e| StoreError::Database(e.to_string()))??);
            }
            Ok(records)
        })
    }

    #[instrument(skip(self, message), fields(thread_id = %id))]
    async fn append_message(
        &self,
        id: &ThreadId,
        message: Message,
    ) -> Result<MessageRecord, StoreError> {
        let record = MessageRecord {
            id: MessageId::new(),
            thread_id: id.clone(),
            message,
            created_at: Utc::now(),
        };

        let payload = serde_json::to_string(&record.message)
            .map_err(|e| StoreError::Database(format!("serialize message: {e}")))?;

        self.db.with_conn(|conn| {
            let position: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(position), -1) + 1 FROM messages WHERE thread_id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| StoreError::Database(e.to_string()))?;

            conn.execute(
                "INSERT INTO messages (id, thread_id, position, role, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.id.as_str(),
                    id.as_str(),
                    position,
                    record.message.role().to_string(),
                    payload,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(())
        })?;

        Ok(record)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn
                .execute("DELETE FROM messages WHERE id = ?1", [id.as_str()])
                .map_err(|e| StoreError::Database(e.to_string()))?;
            if deleted == 0 {
                return Err(StoreError::MessageNotFound(id.clone()));
            }
            Ok(())
        })
    }
}
