use poise::serenity_prelude as serenity;
use tracing::warn;

/// A chat message as the handler sees it, independent of the gateway library.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    /// Set when the message was posted inside a thread
    pub parent_channel_id: Option<String>,
    pub server_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl InboundMessage {
    pub async fn from_serenity(ctx: &serenity::Context, message: &serenity::Message) -> Self {
        Self {
            message_id: message.id.to_string(),
            channel_id: message.channel_id.to_string(),
            parent_channel_id: thread_parent(ctx, message).await,
            server_id: message.guild_id.map(|id| id.to_string()),
            author_id: message.author.id.to_string(),
            author_name: message.author.name.clone(),
            author_is_bot: message.author.bot,
            content: message.content.clone(),
            timestamp: message.timestamp.unix_timestamp(),
        }
    }
}

/// Parent channel id if `message` lives in a thread.
async fn thread_parent(ctx: &serenity::Context, message: &serenity::Message) -> Option<String> {
    parent_of_thread(ctx, message.channel_id)
        .await
        .map(|id| id.to_string())
}

/// Looks `channel_id` up and returns its parent when it is a thread.
pub async fn parent_of_thread(
    cache_http: impl serenity::CacheHttp,
    channel_id: serenity::ChannelId,
) -> Option<serenity::ChannelId> {
    match channel_id.to_channel(cache_http).await {
        Ok(serenity::Channel::Guild(channel)) => thread_parent_id(&channel),
        Ok(_) => None,
        Err(e) => {
            warn!(
                "Could not resolve channel {} for thread lookup: {}",
                channel_id, e
            );
            None
        }
    }
}

pub fn thread_parent_id(channel: &serenity::GuildChannel) -> Option<serenity::ChannelId> {
    if channel.thread_metadata.is_some() {
        channel.parent_id
    } else {
        None
    }
}
