use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::debug;

/// Outbound side of a conversation: one call per message chunk.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Sends one chunk and returns the id of the created message, if known.
    async fn send(&self, content: &str) -> anyhow::Result<Option<String>>;

    /// Best-effort "bot is typing" signal.
    async fn start_typing(&self) {}
}

/// Replies to a specific Discord message.
pub struct DiscordReplySink {
    http: Arc<serenity::Http>,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
}

impl DiscordReplySink {
    pub fn new(
        http: Arc<serenity::Http>,
        channel_id: serenity::ChannelId,
        message_id: serenity::MessageId,
    ) -> Self {
        Self {
            http,
            channel_id,
            message_id,
        }
    }
}

#[async_trait]
impl ReplySink for DiscordReplySink {
    async fn send(&self, content: &str) -> anyhow::Result<Option<String>> {
        let builder = serenity::CreateMessage::new()
            .content(content)
            .reference_message((self.channel_id, self.message_id));
        let sent = self.channel_id.send_message(&self.http, builder).await?;
        Ok(Some(sent.id.to_string()))
    }

    async fn start_typing(&self) {
        if let Err(e) = self.channel_id.broadcast_typing(&self.http).await {
            debug!("Typing indicator failed in channel {}: {}", self.channel_id, e);
        }
    }
}

/// Splits `text` into chunks of at most `limit` characters, breaking only between lines.
///
/// Joining the chunks with `\n` gives back `text`, unless a single line is
/// itself longer than `limit`; such a line is cut at character boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    if text.is_empty() || limit == 0 {
        return chunks;
    }

    let mut current: Option<(String, usize)> = None;
    for line in text.split('\n') {
        for piece in split_long_line(line, limit) {
            let piece_len = piece.chars().count();
            current = match current.take() {
                None => Some((piece.to_string(), piece_len)),
                Some((buffer, len)) if len + 1 + piece_len > limit => {
                    chunks.push(buffer);
                    Some((piece.to_string(), piece_len))
                }
                Some((mut buffer, len)) => {
                    buffer.push('\n');
                    buffer.push_str(piece);
                    Some((buffer, len + 1 + piece_len))
                }
            };
        }
    }

    if let Some((buffer, _)) = current {
        chunks.push(buffer);
    }
    chunks
}

fn split_long_line(line: &str, limit: usize) -> Vec<&str> {
    if line.chars().count() <= limit {
        return vec![line];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in line.char_indices().enumerate() {
        if count > 0 && count % limit == 0 {
            pieces.push(&line[start..idx]);
            start = idx;
        }
    }
    pieces.push(&line[start..]);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DISCORD_MESSAGE_LIMIT;

    #[test]
    fn test_short_message_is_single_chunk() {
        assert_eq!(split_message("hello\nworld", 2000), vec!["hello\nworld"]);
    }

    #[test]
    fn test_empty_message_has_no_chunks() {
        assert!(split_message("", 2000).is_empty());
    }

    #[test]
    fn test_splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_message(text, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_round_trip_and_limit() {
        let text = (0..300)
            .map(|i| format!("Line {} of a long answer with some padding text.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_message(&text, DISCORD_MESSAGE_LIMIT);

        assert!(chunks.len() > 1);
        assert!(chunks
            .iter()
            .all(|c| c.chars().count() <= DISCORD_MESSAGE_LIMIT));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn test_round_trip_keeps_blank_lines() {
        let text = "\nfirst\n\n\nsecond\n";
        assert_eq!(split_message(text, 7).join("\n"), text);
        assert_eq!(split_message(text, 2000).join("\n"), text);
    }

    #[test]
    fn test_overlong_line_is_hard_split() {
        let line = "é".repeat(4500);
        let chunks = split_message(&line, DISCORD_MESSAGE_LIMIT);
        assert_eq!(chunks.len(), 3);
        assert!(chunks
            .iter()
            .all(|c| c.chars().count() <= DISCORD_MESSAGE_LIMIT));
        assert_eq!(chunks.concat(), line);
    }
}
