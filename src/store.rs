//! The handler's view of persistent state.
//!
//! Every call re-reads committed state; nothing here is cached between
//! messages, so admin changes apply to the very next message.

use async_trait::async_trait;

use crate::db::{
    ConversationSummary, Database, NewMessage, RecentMessage, SummaryUpdate, SystemInstructions,
};

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn is_channel_allowed(&self, channel_id: &str) -> anyhow::Result<bool>;

    async fn get_instructions(&self) -> anyhow::Result<SystemInstructions>;

    async fn get_summary(&self, channel_id: &str) -> anyhow::Result<Option<ConversationSummary>>;

    /// Partial update; a text-only update never recreates a reset row.
    /// Returns `false` when nothing was written.
    async fn upsert_summary(
        &self,
        channel_id: &str,
        update: SummaryUpdate,
        server_id: Option<&str>,
    ) -> anyhow::Result<bool>;

    /// Atomic `message_count += by`; returns the new total.
    async fn increment_message_count(
        &self,
        channel_id: &str,
        by: u64,
        server_id: Option<&str>,
    ) -> anyhow::Result<u64>;

    /// Idempotent on a duplicate message id.
    async fn append_message(&self, message: NewMessage) -> anyhow::Result<()>;

    /// Chronological (oldest first).
    async fn get_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<RecentMessage>>;
}

#[async_trait]
impl ContextStore for Database {
    async fn is_channel_allowed(&self, channel_id: &str) -> anyhow::Result<bool> {
        let channel_id = channel_id.to_string();
        self.run_blocking(move |db| db.is_channel_allowed(&channel_id))
            .await
    }

    async fn get_instructions(&self) -> anyhow::Result<SystemInstructions> {
        self.run_blocking(|db| db.get_instructions()).await
    }

    async fn get_summary(&self, channel_id: &str) -> anyhow::Result<Option<ConversationSummary>> {
        let channel_id = channel_id.to_string();
        self.run_blocking(move |db| db.get_summary(&channel_id))
            .await
    }

    async fn upsert_summary(
        &self,
        channel_id: &str,
        update: SummaryUpdate,
        server_id: Option<&str>,
    ) -> anyhow::Result<bool> {
        let channel_id = channel_id.to_string();
        let server_id = server_id.map(str::to_string);
        self.run_blocking(move |db| db.upsert_summary(&channel_id, &update, server_id.as_deref()))
            .await
    }

    async fn increment_message_count(
        &self,
        channel_id: &str,
        by: u64,
        server_id: Option<&str>,
    ) -> anyhow::Result<u64> {
        let channel_id = channel_id.to_string();
        let server_id = server_id.map(str::to_string);
        self.run_blocking(move |db| {
            db.increment_message_count(&channel_id, by, server_id.as_deref())
        })
        .await
    }

    async fn append_message(&self, message: NewMessage) -> anyhow::Result<()> {
        let inserted = self
            .run_blocking(move |db| db.save_message(&message))
            .await?;
        if !inserted {
            tracing::debug!("Database: duplicate message id ignored");
        }
        Ok(())
    }

    async fn get_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<RecentMessage>> {
        let channel_id = channel_id.to_string();
        self.run_blocking(move |db| db.get_recent_messages(&channel_id, limit))
            .await
    }
}
