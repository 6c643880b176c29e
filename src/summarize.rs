//! Rolling summary maintenance.
//!
//! A channel's history is folded into one short summary, refreshed every
//! [`SUMMARY_INTERVAL`] logged messages by merging the latest exchange into
//! the previous summary.

use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::CompletionProvider;

/// Logged messages (user + assistant) between summary refreshes
pub const SUMMARY_INTERVAL: u64 = 10;
/// Hard ceiling on stored summary length, in characters
pub const MAX_SUMMARY_CHARS: usize = 1000;

/// True after message 10, 20, 30, ...
pub fn should_summarize(total_message_count: u64) -> bool {
    total_message_count > 0 && total_message_count % SUMMARY_INTERVAL == 0
}

#[derive(Clone)]
pub struct SummaryUpdater {
    llm: Arc<dyn CompletionProvider>,
}

impl SummaryUpdater {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    /// Merges one exchange into `current_summary`. Any failure yields `current_summary` unchanged.
    pub async fn update_summary(
        &self,
        current_summary: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> String {
        if user_message.trim().is_empty() && assistant_message.trim().is_empty() {
            warn!("Empty exchange passed to summary update, keeping existing summary");
            return current_summary.to_string();
        }

        let prompt = build_summary_prompt(current_summary, user_message, assistant_message);

        let Some(candidate) = self.llm.complete(&prompt).await else {
            warn!("Summary generation failed, keeping existing summary");
            return current_summary.to_string();
        };

        if candidate.trim().is_empty() {
            warn!("Summary generation returned empty text, keeping existing summary");
            return current_summary.to_string();
        }

        let length = candidate.chars().count();
        if length > MAX_SUMMARY_CHARS {
            warn!("Summary too long ({} chars), truncating", length);
            return cap_summary(&candidate);
        }

        info!("Summary updated: {} chars", length);
        candidate
    }
}

fn cap_summary(text: &str) -> String {
    let mut capped: String = text.chars().take(MAX_SUMMARY_CHARS - 3).collect();
    capped.push_str("...");
    capped
}

/// Rough cost of one logged message if the full history were replayed
const TOKENS_PER_MESSAGE: u64 = 15;

/// How much prompt space a channel's summary saves over replaying its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSavings {
    pub history_tokens: u64,
    pub summary_tokens: u64,
    /// Negative when the summary outweighs the history it replaces
    pub percent: i64,
}

pub fn token_savings(message_count: u64, summary_chars: usize) -> TokenSavings {
    let history_tokens = message_count * TOKENS_PER_MESSAGE;
    let summary_tokens = (summary_chars as u64).div_ceil(4);
    let percent = if history_tokens > 0 {
        let saved = history_tokens as f64 - summary_tokens as f64;
        round_half_up(saved / history_tokens as f64 * 100.0)
    } else {
        0
    };

    TokenSavings {
        history_tokens,
        summary_tokens,
        percent,
    }
}

/// Mean of per-channel savings percentages, 0 for no channels.
pub fn average_savings(percents: &[i64]) -> i64 {
    if percents.is_empty() {
        return 0;
    }
    round_half_up(percents.iter().sum::<i64>() as f64 / percents.len() as f64)
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

pub fn build_summary_prompt(current_summary: &str, user_message: &str, assistant_message: &str) -> String {
    let existing = if current_summary.trim().is_empty() {
        "[No previous context]"
    } else {
        current_summary
    };

    format!(
        "You are a precise conversation summarizer for a Discord AI assistant.

TASK: Update the existing summary with the information from the latest exchange.

EXISTING SUMMARY:
{existing}

NEW EXCHANGE:
User: {user_message}
Assistant: {assistant_message}

RULES:
1. Merge the new facts into the existing summary
2. Keep only lasting context: decisions, requests, solutions, preferences, facts
3. Drop greetings, confirmations and small talk
4. Use 2-4 sentences
5. Plain text only, no markdown or formatting
6. Be deterministic and factual

OUTPUT: the updated summary as plain text"
    )
}
