use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Manage the channels the bot answers in
#[poise::command(
    slash_command,
    subcommands("add", "remove", "list"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn channels(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Allow the bot to respond in a channel
#[poise::command(slash_command)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Channel to allow"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let channel_id = channel.id.to_string();
    let name = channel.name.clone();
    let guild_id = channel.guild_id.to_string();
    let inserted = ctx
        .data()
        .db
        .run_blocking(move |db| {
            db.add_allowed_channel(&channel_id, Some(name.as_str()), Some(guild_id.as_str()))
        })
        .await?;

    if inserted {
        info!(
            "Channel {} ({}) allowed by {}",
            channel.name,
            channel.id,
            ctx.author().name
        );
        ctx.say(format!("✅ I will now respond in <#{}>.", channel.id))
            .await?;
    } else {
        ctx.say(format!("ℹ️ <#{}> is already allowed.", channel.id))
            .await?;
    }
    Ok(())
}

/// Stop the bot from responding in a channel
#[poise::command(slash_command)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Channel to remove"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let channel_id = channel.id.to_string();
    let removed = ctx
        .data()
        .db
        .run_blocking(move |db| db.remove_allowed_channel(&channel_id))
        .await?;

    if removed > 0 {
        info!(
            "Channel {} ({}) removed by {}",
            channel.name,
            channel.id,
            ctx.author().name
        );
        ctx.say(format!("✅ I will no longer respond in <#{}>.", channel.id))
            .await?;
    } else {
        ctx.say(format!("📭 <#{}> was not on the list.", channel.id))
            .await?;
    }
    Ok(())
}

/// List allowed channels
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let channels = ctx
        .data()
        .db
        .run_blocking(|db| db.list_allowed_channels())
        .await?;

    if channels.is_empty() {
        ctx.say("📭 No channels are allowed yet. Use `/channels add`.")
            .await?;
        return Ok(());
    }

    let lines = channels
        .iter()
        .map(|c| match &c.channel_name {
            Some(name) => format!("• <#{}> (`#{}`, added {})", c.channel_id, name, c.created_at),
            None => format!("• <#{}> (added {})", c.channel_id, c.created_at),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let embed = serenity::CreateEmbed::new()
        .title("💬 Allowed Channels")
        .description(super::clip(&lines, 4000))
        .footer(serenity::CreateEmbedFooter::new(format!(
            "{} channel(s)",
            channels.len()
        )))
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
