//! Prompt assembly for the chat completion call.
//!
//! The section order and labels below are what the model sees on every
//! message; changing them changes reply behaviour.

use crate::config::DISCORD_MESSAGE_LIMIT;

/// Token budget for the rolling summary section
pub const SUMMARY_TOKEN_BUDGET: usize = 75;
/// Token budget for the recent messages section
pub const RECENT_TOKEN_BUDGET: usize = 150;

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful Discord assistant.";
const DEFAULT_SUMMARY: &str = "No previous context.";
const DEFAULT_RECENT: &str = "No recent messages.";
const DEFAULT_RETRIEVED: &str = "No retrieved knowledge for this query.";
const DEFAULT_USER_MESSAGE: &str = "(Empty user message)";
const ELLIPSIS: &str = "...";

pub struct PromptContext<'a> {
    pub instructions: &'a str,
    pub summary: &'a str,
    pub recent_messages: &'a str,
    pub user_message: &'a str,
    pub retrieved: Option<&'a str>,
}

/// Rough token estimate: the larger of ~1.3 tokens per word and ~1 token per 4 characters.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let chars = text.chars().count();
    words_to_tokens(words).max(chars.div_ceil(4))
}

fn words_to_tokens(words: usize) -> usize {
    (words * 13).div_ceil(10)
}

/// Cuts `text` to the longest prefix that fits `max_tokens`, marking the cut with `...`.
pub fn truncate_to_token_limit(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let mut max_words = max_tokens * 10 / 13;
    while words_to_tokens(max_words + 1) <= max_tokens {
        max_words += 1;
    }
    while max_words > 0 && words_to_tokens(max_words) > max_tokens {
        max_words -= 1;
    }
    let max_chars = max_tokens * 4;

    let mut cut = text.len();
    let mut words = 0usize;
    let mut prev_is_space = true;
    for (count, (idx, ch)) in text.char_indices().enumerate() {
        if count == max_chars {
            cut = idx;
            break;
        }
        let is_space = ch.is_whitespace();
        if !is_space && prev_is_space {
            words += 1;
            if words > max_words {
                cut = idx;
                break;
            }
        }
        prev_is_space = is_space;
    }

    let mut truncated = text[..cut].trim_end().to_string();
    truncated.push_str(ELLIPSIS);
    truncated
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default
    } else {
        trimmed
    }
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let instructions = or_default(ctx.instructions, DEFAULT_INSTRUCTIONS);
    let summary = truncate_to_token_limit(
        or_default(ctx.summary, DEFAULT_SUMMARY),
        SUMMARY_TOKEN_BUDGET,
    );
    let recent = truncate_to_token_limit(
        or_default(ctx.recent_messages, DEFAULT_RECENT),
        RECENT_TOKEN_BUDGET,
    );
    let retrieved = or_default(ctx.retrieved.unwrap_or_default(), DEFAULT_RETRIEVED);
    let user_message = or_default(ctx.user_message, DEFAULT_USER_MESSAGE);
    let rule = "═".repeat(63);

    format!(
        "You are a helpful Discord AI assistant. Respond concisely and naturally.

{rule}

SYSTEM INSTRUCTIONS:
{instructions}

{rule}

CONVERSATION CONTEXT:

Long-term Summary (rolling context):
{summary}

Recent Messages (last few turns):
{recent}

Retrieved Knowledge:
{retrieved}

{rule}

USER'S CURRENT MESSAGE:
{user_message}

{rule}

Respond directly to the user's message. Be helpful, accurate, and concise.
Keep responses under {DISCORD_MESSAGE_LIMIT} characters (Discord message limit)."
    )
}
