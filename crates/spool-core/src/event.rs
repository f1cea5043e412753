use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ThreadId;
use crate::message::Message;

/// Events published to every subscriber watching a thread. For a single
/// run, events are delivered to each sink in the order produced; no
/// reordering across event kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// Marks stream start (`streaming: true`) and end (`streaming: false`).
    #[serde(rename = "session")]
    Session {
        thread_id: ThreadId,
        streaming: bool,
        timestamp: DateTime<Utc>,
    },

    /// A full rendered turn, partial while streaming or final on persist.
    #[serde(rename = "message")]
    Message {
        thread_id: ThreadId,
        message: Message,
        timestamp: DateTime<Utc>,
    },

    /// Out-of-band thread metadata updates.
    #[serde(rename = "thread")]
    Thread {
        thread_id: ThreadId,
        update: ThreadUpdate,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error {
        thread_id: ThreadId,
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "update_type")]
pub enum ThreadUpdate {
    #[serde(rename = "title")]
    Title { title: String },
}

impl RunEvent {
    pub fn session(thread_id: ThreadId, streaming: bool) -> Self {
        Self::Session {
            thread_id,
            streaming,
            timestamp: Utc::now(),
        }
    }

    pub fn message(thread_id: ThreadId, message: Message) -> Self {
        Self::Message {
            thread_id,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn title(thread_id: ThreadId, title: impl Into<String>) -> Self {
        Self::Thread {
            thread_id,
            update: ThreadUpdate::Title { title: title.into() },
            timestamp: Utc::now(),
        }
    }

    pub fn error(
        thread_id: ThreadId,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self::Error {
            thread_id,
            code: code.into(),
            message: message.into(),
            details,
            timestamp: Utc::now(),
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::Session { thread_id, .. }
            | Self::Message { thread_id, .. }
            | Self::Thread { thread_id, .. }
            | Self::Error { thread_id, .. } => thread_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Message { .. } => "message",
            Self::Thread { .. } => "thread",
            Self::Error { .. } => "error",
        }
    }
}
