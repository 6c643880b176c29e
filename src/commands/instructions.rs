use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// View or change the bot's system instructions
#[poise::command(
    slash_command,
    subcommands("show", "set"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn instructions(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current system instructions
#[poise::command(slash_command)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let instructions = ctx
        .data()
        .db
        .run_blocking(|db| db.get_instructions())
        .await?;
    let config = &ctx.data().config;

    let description = if instructions.text.trim().is_empty() {
        "No instructions set. The bot uses its default assistant persona.".to_string()
    } else {
        super::clip(&instructions.text, 4000)
    };

    // Stored ai_config is informational; replies use the process configuration
    let embed = serenity::CreateEmbed::new()
        .title("📜 System Instructions")
        .description(description)
        .field("Live model", format!("`{}`", config.llm_model), true)
        .field("Live temperature", format!("`{}`", config.llm_temperature), true)
        .field(
            "Max output",
            format!("`{}` tokens", config.llm_max_output_tokens),
            true,
        )
        .field(
            "Stored AI config",
            format!(
                "`{}` / `{}` @ `{}`",
                instructions.ai_config.provider,
                instructions.ai_config.model,
                instructions.ai_config.temperature
            ),
            false,
        )
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Replace the system instructions
#[poise::command(slash_command)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "New instructions (empty clears them)"]
    #[max_length = 4000]
    text: String,
) -> Result<(), Error> {
    let text = text.trim().to_string();
    let chars = text.chars().count();
    ctx.data()
        .db
        .run_blocking(move |db| db.set_instructions(&text))
        .await?;
    info!(
        "System instructions updated by {} ({} chars)",
        ctx.author().name,
        chars
    );
    ctx.say("✅ Instructions updated. They apply from the next message.")
        .await?;
    Ok(())
}
