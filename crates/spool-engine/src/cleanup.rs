use tracing::{error, warn};

use spool_core::ids::{MessageId, ThreadId};
use spool_core::store::{MessageRecord, ThreadStore};

/// Repair a thread so its message sequence ends on an assistant turn.
///
/// With a saved assistant message id, everything after that message is
/// deleted (dangling remnants of an interrupted round). When the id is
/// absent or cannot be found, trailing non-assistant messages are deleted
/// from the end until an assistant turn (or the start of the thread) is
/// reached.
///
/// Runs on the finally path of every run: failures are logged and
/// skipped, and the function never returns an error.
pub async fn ensure_ends_with_assistant(
    store: &dyn ThreadStore,
    thread_id: &ThreadId,
    last_saved: Option<&MessageId>,
) {
    let messages = match store.messages(thread_id).await {
        Ok(messages) => messages,
        Err(e) => {
            error!(thread_id = %thread_id, error = %e, "cleanup could not read thread messages");
            return;
        }
    };

    let trailing = trailing_messages(&messages, last_saved);

    for record in trailing {
        if let Err(e) = store.delete_message(&record.id).await {
            warn!(
                thread_id = %thread_id,
                message_id = %record.id,
                error = %e,
                "failed to delete trailing message, skipping"
            );
        }
    }
}

fn trailing_messages<'a>(
    messages: &'a [MessageRecord],
    last_saved: Option<&MessageId>,
) -> Vec<&'a MessageRecord> {
    if let Some(saved_id) = last_saved {
        if let Some(pos) = messages.iter().position(|m| &m.id == saved_id) {
            return messages[pos + 1..].iter().collect();
        }
        // Raced with a concurrent deletion: fall back to the scan.
        warn!(message_id = %saved_id, "saved assistant message not found, using trailing scan");
    }

    let mut trailing = Vec::new();
    for record in messages.iter().rev() {
        if record.message.is_assistant() {
            break;
        }
        trailing.push(record);
    }
    trailing.reverse();
    trailing
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use spool_core::ids::{OrgId, ToolCallId};
    use spool_core::message::Message;
    use spool_core::store::{StoreError, ThreadRecord};
    use spool_store::{Database, SqliteThreadStore};

    async fn seeded_thread(
        store: &SqliteThreadStore,
        messages: Vec<Message>,
    ) -> (ThreadRecord, Vec<MessageRecord>) {
        let thread = store
            .create_thread(&OrgId::new(), "test-model", false, "en-US")
            .await
            .unwrap();
        let mut records = Vec::new();
        for message in messages {
            records.push(store.append_message(&thread.id, message).await.unwrap());
        }
        (thread, records)
    }

    fn tool_msg(name: &str) -> Message {
        Message::tool_result(ToolCallId::new(), name, "left over")
    }

    #[tokio::test]
    async fn deletes_everything_after_saved_id() {
        let store = SqliteThreadStore::new(Database::in_memory().unwrap());
        let (thread, records) = seeded_thread(
            &store,
            vec![
                Message::user_text("hi"),
                Message::assistant_text("calling tools"),
                tool_msg("search"),
                tool_msg("lookup"),
            ],
        )
        .await;

        ensure_ends_with_assistant(&store, &thread.id, Some(&records[1].id)).await;

        let remaining = store.messages(&thread.id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining[1].message.is_assistant());
    }

    #[tokio::test]
    async fn trailing_scan_stops_at_assistant() {
        let store = SqliteThreadStore::new(Database::in_memory().unwrap());
        let (thread, _) = seeded_thread(
            &store,
            vec![
                Message::user_text("hi"),
                Message::assistant_text("answer"),
                tool_msg("search"),
            ],
        )
        .await;

        ensure_ends_with_assistant(&store, &thread.id, None).await;

        let remaining = store.messages(&thread.id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining[1].message.is_assistant());
    }

    #[tokio::test]
    async fn scan_with_no_assistant_empties_thread() {
        let store = SqliteThreadStore::new(Database::in_memory().unwrap());
        let (thread, _) = seeded_thread(
            &store,
            vec![Message::user_text("hi"), tool_msg("search")],
        )
        .await;

        ensure_ends_with_assistant(&store, &thread.id, None).await;

        assert!(store.messages(&thread.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_saved_id_falls_back_to_scan() {
        let store = SqliteThreadStore::new(Database::in_memory().unwrap());
        let (thread, _) = seeded_thread(
            &store,
            vec![
                Message::user_text("hi"),
                Message::assistant_text("answer"),
                tool_msg("search"),
            ],
        )
        .await;

        let ghost = MessageId::new();
        ensure_ends_with_assistant(&store, &thread.id, Some(&ghost)).await;

        let remaining = store.messages(&thread.id).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn already_clean_thread_is_untouched() {
        let store = SqliteThreadStore::new(Database::in_memory().unwrap());
        let (thread, records) = seeded_thread(
            &store,
            vec![Message::user_text("hi"), Message::assistant_text("answer")],
        )
        .await;

        ensure_ends_with_assistant(&store, &thread.id, Some(&records[1].id)).await;
        assert_eq!(store.messages(&thread.id).await.unwrap().len(), 2);

        ensure_ends_with_assistant(&store, &thread.id, None).await;
        assert_eq!(store.messages(&thread.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_thread_is_a_noop() {
        let store = SqliteThreadStore::new(Database::in_memory().unwrap());
        let thread = store
            .create_thread(&OrgId::new(), "test-model", false, "en-US")
            .await
            .unwrap();

        ensure_ends_with_assistant(&store, &thread.id, None).await;
        assert!(store.messages(&thread.id).await.unwrap().is_empty());
    }

    // --- Deletion-failure tolerance ---

    /// Store wrapper that fails deletions for selected message ids.
    struct FlakyStore {
        inner: SqliteThreadStore,
        fail_ids: Mutex<Vec<MessageId>>,
    }

    #[async_trait]
    impl ThreadStore for FlakyStore {
        async fn create_thread(
            &self,
            org_id: &OrgId,
            model: &str,
            anonymous: bool,
            locale: &str,
        ) -> Result<ThreadRecord, StoreError> {
            self.inner.create_thread(org_id, model, anonymous, locale).await
        }

        async fn thread(&self, id: &ThreadId) -> Result<ThreadRecord, StoreError> {
            self.inner.thread(id).await
        }

        async fn set_title(&self, id: &ThreadId, title: &str) -> Result<(), StoreError> {
            self.inner.set_title(id, title).await
        }

        async fn messages(&self, id: &ThreadId) -> Result<Vec<MessageRecord>, StoreError> {
            self.inner.messages(id).await
        }

        async fn append_message(
            &self,
            id: &ThreadId,
            message: Message,
        ) -> Result<MessageRecord, StoreError> {
            self.inner.append_message(id, message).await
        }

        async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError> {
            if self.fail_ids.lock().contains(id) {
                return Err(StoreError::Database("simulated deletion failure".into()));
            }
            self.inner.delete_message(id).await
        }
    }

    #[tokio::test]
    async fn deletion_failure_does_not_stop_the_sweep() {
        let inner = SqliteThreadStore::new(Database::in_memory().unwrap());
        let (thread, records) = seeded_thread(
            &inner,
            vec![
                Message::user_text("hi"),
                Message::assistant_text("calling tools"),
                tool_msg("search"),
                tool_msg("lookup"),
            ],
        )
        .await;

        let store = FlakyStore {
            inner,
            // First trailing message refuses to die.
            fail_ids: Mutex::new(vec![records[2].id.clone()]),
        };

        ensure_ends_with_assistant(&store, &thread.id, Some(&records[1].id)).await;

        let remaining = store.messages(&thread.id).await.unwrap();
        // The failed one survives, the one after it was still attempted.
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[2].id, records[2].id);
    }
}
