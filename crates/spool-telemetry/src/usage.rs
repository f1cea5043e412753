use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use spool_core::ids::ThreadId;
use spool_core::stream::UsageSummary;
use spool_core::usage::UsageRecorder;

/// A persisted usage record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRow {
    pub id: i64,
    pub thread_id: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub recorded_at: String,
}

/// SQLite-backed usage ledger. Recording is fire-and-forget: insert
/// failures are logged and swallowed, never surfaced to the run loop.
pub struct UsageLedger {
    conn: Mutex<Connection>,
}

impl UsageLedger {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS usage_records (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 thread_id TEXT NOT NULL,
                 input_tokens INTEGER NOT NULL,
                 output_tokens INTEGER NOT NULL,
                 recorded_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_usage_thread ON usage_records(thread_id);",
        )
    }

    /// Records for a thread, most recent first.
    pub fn for_thread(&self, thread_id: &ThreadId) -> Result<Vec<UsageRow>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, input_tokens, output_tokens, recorded_at
             FROM usage_records WHERE thread_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([thread_id.as_str()], |row| {
            Ok(UsageRow {
                id: row.get(0)?,
                thread_id: row.get(1)?,
                input_tokens: row.get(2)?,
                output_tokens: row.get(3)?,
                recorded_at: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    /// Total tokens recorded for a thread: (input, output).
    pub fn totals(&self, thread_id: &ThreadId) -> Result<(u64, u64), rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM usage_records WHERE thread_id = ?1",
            [thread_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }
}

impl UsageRecorder for UsageLedger {
    fn record(&self, thread_id: &ThreadId, usage: UsageSummary) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO usage_records (thread_id, input_tokens, output_tokens, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                thread_id.as_str(),
                usage.input_tokens,
                usage.output_tokens,
                Utc::now().to_rfc3339(),
            ],
        );
        if let Err(e) = result {
            warn!(thread_id = %thread_id, error = %e, "failed to record usage");
        }
    }
}
