use crate::inbound::{parent_of_thread, thread_parent_id};
use crate::summarize::{average_savings, token_savings, SUMMARY_INTERVAL};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Inspect or reset per-channel conversation memory
#[poise::command(
    slash_command,
    subcommands("show", "list", "reset"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn memory(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the rolling summary for a channel
#[poise::command(slash_command)]
pub async fn show(
    ctx: Context<'_>,
    #[description = "Channel (defaults to this one)"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = memory_channel(ctx, channel).await?;
    let key = channel_id.to_string();
    let record = ctx
        .data()
        .db
        .run_blocking(move |db| db.get_summary(&key))
        .await?;

    let Some(record) = record else {
        ctx.say(format!("📭 No memory stored for <#{}> yet.", channel_id))
            .await?;
        return Ok(());
    };

    let description = if record.summary.trim().is_empty() {
        format!(
            "No summary yet. One is written every {} messages.",
            SUMMARY_INTERVAL
        )
    } else {
        super::clip(&record.summary, 4000)
    };
    let savings = token_savings(record.message_count, record.summary.chars().count());

    let embed = serenity::CreateEmbed::new()
        .title("🧠 Conversation Memory")
        .description(description)
        .field("Channel", format!("<#{}>", channel_id), true)
        .field("Messages", record.message_count.to_string(), true)
        .field(
            "Next summary at",
            next_summary_at(record.message_count).to_string(),
            true,
        )
        .field(
            "Token efficiency",
            format!(
                "{}% saved ({} → {} tokens)",
                savings.percent, savings.history_tokens, savings.summary_tokens
            ),
            false,
        )
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Last updated: {}",
            record.updated_at
        )))
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List every channel with stored memory
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let records = ctx
        .data()
        .db
        .run_blocking(|db| db.list_summaries())
        .await?;

    if records.is_empty() {
        ctx.say("📭 No conversation memory stored yet.").await?;
        return Ok(());
    }

    let mut percents = Vec::with_capacity(records.len());
    let mut lines = Vec::with_capacity(records.len());
    for r in &records {
        let savings = token_savings(r.message_count, r.summary.chars().count());
        percents.push(savings.percent);
        lines.push(format!(
            "• <#{}>: {} messages, {}",
            r.channel_id,
            r.message_count,
            if r.summary.trim().is_empty() {
                "no summary".to_string()
            } else {
                format!("{}% tokens saved", savings.percent)
            }
        ));
    }
    let total_messages: u64 = records.iter().map(|r| r.message_count).sum();

    let embed = serenity::CreateEmbed::new()
        .title("🧠 Stored Memory")
        .description(super::clip(&lines.join("\n"), 4000))
        .footer(serenity::CreateEmbedFooter::new(format!(
            "{} channel(s) • {} messages • {}% average savings",
            records.len(),
            total_messages,
            average_savings(&percents)
        )))
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Forget the summary and message count for a channel
#[poise::command(slash_command)]
pub async fn reset(
    ctx: Context<'_>,
    #[description = "Channel (defaults to this one)"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = memory_channel(ctx, channel).await?;
    let key = channel_id.to_string();
    let removed = ctx
        .data()
        .db
        .run_blocking(move |db| db.reset_summary(&key))
        .await?;

    if removed > 0 {
        info!("Memory reset for channel {} by {}", channel_id, ctx.author().name);
        ctx.say(format!("✅ Memory for <#{}> has been reset.", channel_id))
            .await?;
    } else {
        ctx.say(format!("📭 No memory stored for <#{}>.", channel_id))
            .await?;
    }
    Ok(())
}

/// Resolves the channel whose memory the bot uses for messages posted in
/// `channel` (or the invoking channel).
async fn memory_channel(
    ctx: Context<'_>,
    channel: Option<serenity::GuildChannel>,
) -> Result<serenity::ChannelId, Error> {
    let (channel_id, parent) = match channel {
        Some(c) => (c.id, thread_parent_id(&c)),
        None => {
            let id = ctx.channel_id();
            (id, parent_of_thread(ctx.serenity_context(), id).await)
        }
    };
    if parent.is_none() {
        return Ok(channel_id);
    }

    let key = channel_id.to_string();
    let allowed = ctx
        .data()
        .db
        .run_blocking(move |db| db.is_channel_allowed(&key))
        .await?;
    Ok(memory_key(channel_id, parent, allowed))
}

/// A thread keeps its own memory only when it is allow-listed itself;
/// otherwise it shares its parent's.
fn memory_key(
    channel_id: serenity::ChannelId,
    parent: Option<serenity::ChannelId>,
    channel_allowed: bool,
) -> serenity::ChannelId {
    match parent {
        Some(parent) if !channel_allowed => parent,
        _ => channel_id,
    }
}

/// First count after `count` that triggers a summary refresh.
fn next_summary_at(count: u64) -> u64 {
    (count / SUMMARY_INTERVAL + 1) * SUMMARY_INTERVAL
}
