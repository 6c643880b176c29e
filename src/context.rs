//! Per-message conversation context.
//!
//! Loads everything a prompt needs for one channel: the admin instructions,
//! the rolling summary and the short verbatim recency window.

use crate::db::{ConversationSummary, RecentMessage, SystemInstructions};
use crate::store::ContextStore;

pub struct ConversationContext {
    pub instructions: SystemInstructions,
    pub summary: Option<ConversationSummary>,
    pub recent: Vec<RecentMessage>,
}

impl ConversationContext {
    /// Reads the three pieces concurrently; the first failure aborts the load.
    pub async fn load(
        store: &dyn ContextStore,
        channel_id: &str,
        window: usize,
    ) -> anyhow::Result<Self> {
        let (instructions, summary, recent) = tokio::try_join!(
            store.get_instructions(),
            store.get_summary(channel_id),
            store.get_recent_messages(channel_id, window),
        )?;

        Ok(Self {
            instructions,
            summary,
            recent,
        })
    }

    /// Summary text, empty when the channel has no record yet.
    pub fn summary_text(&self) -> &str {
        self.summary
            .as_ref()
            .map(|s| s.summary.as_str())
            .unwrap_or("")
    }

    pub fn recent_text(&self) -> String {
        format_recent(&self.recent)
    }
}

/// `"author: content"` per line, oldest first. Empty input renders as an empty string.
pub fn format_recent(messages: &[RecentMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.author, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
