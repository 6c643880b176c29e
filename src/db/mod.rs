mod schema;

use crate::config::Config;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Fixed settings key for the singleton instructions record
pub const INSTRUCTIONS_KEY: &str = "system_instructions";

#[derive(Debug, Clone, Serialize)]
pub struct AllowedChannel {
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub server_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    pub model: String,
    pub provider: String,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-flash-latest".to_string(),
            provider: "gemini".to_string(),
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInstructions {
    pub text: String,
    #[serde(default)]
    pub ai_config: AiConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub channel_id: String,
    pub summary: String,
    pub message_count: u64,
    pub updated_at: String,
    pub last_message_at: Option<String>,
    pub server_id: Option<String>,
}

/// Partial update for a summary row. `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct SummaryUpdate {
    pub summary: Option<String>,
    pub message_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: String,
    pub message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub role: Role,
    pub server_id: Option<String>,
    /// Unix seconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    pub author: String,
    pub content: String,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection mutex poisoned"))
    }

    /// Runs a synchronous database closure on the blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn()?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> anyhow::Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    // --- Allow-list ---

    /// Returns `true` when a new row was created; re-adding an existing channel is a no-op.
    pub fn add_allowed_channel(
        &self,
        channel_id: &str,
        channel_name: Option<&str>,
        server_id: Option<&str>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO allowed_channels (channel_id, channel_name, server_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(channel_id) DO NOTHING",
            (channel_id, channel_name, server_id),
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_allowed_channel(&self, channel_id: &str) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM allowed_channels WHERE channel_id = ?1",
            (channel_id,),
        )?;
        Ok(count)
    }

    pub fn is_channel_allowed(&self, channel_id: &str) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        let exists = conn
            .prepare("SELECT 1 FROM allowed_channels WHERE channel_id = ?1")?
            .exists([channel_id])?;
        Ok(exists)
    }

    pub fn list_allowed_channels(&self) -> anyhow::Result<Vec<AllowedChannel>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id, channel_name, server_id, created_at
             FROM allowed_channels ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AllowedChannel {
                channel_id: row.get(0)?,
                channel_name: row.get(1)?,
                server_id: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- Instructions ---

    pub fn get_instructions(&self) -> anyhow::Result<SystemInstructions> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [INSTRUCTIONS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(SystemInstructions::default()),
        }
    }

    /// Replaces the instruction text, keeping the stored AI configuration.
    pub fn set_instructions(&self, text: &str) -> anyhow::Result<()> {
        let mut instructions = self.get_instructions()?;
        instructions.text = text.to_string();
        let value = serde_json::to_string(&instructions)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP",
            (INSTRUCTIONS_KEY, value),
        )?;
        Ok(())
    }

    // --- Summaries ---

    pub fn get_summary(&self, channel_id: &str) -> anyhow::Result<Option<ConversationSummary>> {
        let conn = self.conn()?;
        let summary = conn
            .query_row(
                "SELECT channel_id, summary, message_count, updated_at, last_message_at, server_id
                 FROM summaries WHERE channel_id = ?1",
                [channel_id],
                map_summary,
            )
            .optional()?;
        Ok(summary)
    }

    pub fn list_summaries(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id, summary, message_count, updated_at, last_message_at, server_id
             FROM summaries ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], map_summary)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Partially updates a summary row. The stored count never decreases.
    ///
    /// An update carrying a count creates the row when missing. A text-only
    /// update never inserts, so a refresh racing a reset cannot bring the
    /// deleted row back. Returns `false` when no row was written.
    pub fn upsert_summary(
        &self,
        channel_id: &str,
        update: &SummaryUpdate,
        server_id: Option<&str>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        let written = match update.message_count {
            Some(count) => conn.execute(
                "INSERT INTO summaries (channel_id, summary, message_count, server_id, updated_at)
                 VALUES (?1, COALESCE(?2, ''), ?3, ?4, CURRENT_TIMESTAMP)
                 ON CONFLICT(channel_id) DO UPDATE SET
                    summary = COALESCE(?2, summary),
                    message_count = MAX(message_count, ?3),
                    server_id = COALESCE(?4, server_id),
                    updated_at = CURRENT_TIMESTAMP",
                (channel_id, update.summary.as_deref(), count as i64, server_id),
            )?,
            None => conn.execute(
                "UPDATE summaries SET
                    summary = COALESCE(?2, summary),
                    server_id = COALESCE(?3, server_id),
                    updated_at = CURRENT_TIMESTAMP
                 WHERE channel_id = ?1",
                (channel_id, update.summary.as_deref(), server_id),
            )?,
        };
        Ok(written > 0)
    }

    /// Atomically adds `by` to the channel's counter, creating the row if needed.
    /// Returns the new count.
    pub fn increment_message_count(
        &self,
        channel_id: &str,
        by: u64,
        server_id: Option<&str>,
    ) -> anyhow::Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "INSERT INTO summaries (channel_id, summary, message_count, server_id, updated_at, last_message_at)
             VALUES (?1, '', ?2, ?3, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
             ON CONFLICT(channel_id) DO UPDATE SET
                message_count = message_count + excluded.message_count,
                server_id = COALESCE(excluded.server_id, server_id),
                updated_at = CURRENT_TIMESTAMP,
                last_message_at = CURRENT_TIMESTAMP
             RETURNING message_count",
            (channel_id, by as i64, server_id),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Deletes the whole row, so both text and counter return to their defaults.
    pub fn reset_summary(&self, channel_id: &str) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM summaries WHERE channel_id = ?1", (channel_id,))?;
        Ok(count)
    }

    // --- Message log ---

    /// Returns `false` when the message id was already logged for this channel.
    pub fn save_message(&self, message: &NewMessage) -> anyhow::Result<bool> {
        debug!(
            "Database: Saving {} message {} from {} in channel {}",
            message.role.as_str(),
            message.message_id,
            message.author_id,
            message.channel_id
        );
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages
                (channel_id, message_id, user_id, username, content, role, server_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime(?8, 'unixepoch'))",
            (
                &message.channel_id,
                &message.message_id,
                &message.author_id,
                &message.author_name,
                &message.content,
                message.role.as_str(),
                message.server_id.as_deref(),
                message.timestamp,
            ),
        )?;
        Ok(inserted > 0)
    }

    /// Most recent `limit` messages of a channel, oldest first.
    pub fn get_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<RecentMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT username, content FROM messages
             WHERE channel_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map((channel_id, limit as i64), |row| {
            Ok(RecentMessage {
                author: row.get(0)?,
                content: row.get(1)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        results.reverse();
        Ok(results)
    }
}

fn map_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationSummary> {
    let count: i64 = row.get(2)?;
    Ok(ConversationSummary {
        channel_id: row.get(0)?,
        summary: row.get(1)?,
        message_count: count.max(0) as u64,
        updated_at: row.get(3)?,
        last_message_at: row.get(4)?,
        server_id: row.get(5)?,
    })
}
