use poise::serenity_prelude as serenity;
use rollcord::handler::{BotIdentity, MessageHandler};
use rollcord::inbound::InboundMessage;
use rollcord::llm::{CompletionProvider, LlmClient};
use rollcord::reply::DiscordReplySink;
use rollcord::{commands, config::Config, db::Database, Data};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    debug!("Loaded configuration: {:?}", config);
    let discord_token = config.discord_token.clone();

    let db = Database::new(&config)?;
    db.execute_init()?;

    let owners = config
        .owner_id
        .map(|id| HashSet::from([serenity::UserId::new(id)]))
        .unwrap_or_default();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            owners,
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::Message { new_message } = event {
                        // Allow-listing is per guild channel; DMs are never answered
                        if new_message.author.bot || new_message.guild_id.is_none() {
                            return Ok(());
                        }

                        let ctx = ctx.clone();
                        let message = new_message.clone();
                        let handler = Arc::clone(&data.handler);
                        tokio::spawn(async move {
                            let inbound = InboundMessage::from_serenity(&ctx, &message).await;
                            let sink = DiscordReplySink::new(
                                ctx.http.clone(),
                                message.channel_id,
                                message.id,
                            );
                            let outcome = handler.handle(&inbound, &sink).await;
                            debug!("Message {} handled: {:?}", message.id, outcome);
                        });
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot is ready! Logged in as {}", ready.user.name);

                if config.register_commands {
                    match config.dev_guild_id {
                        Some(guild_id) => {
                            poise::builtins::register_in_guild(
                                ctx,
                                &framework.options().commands,
                                serenity::GuildId::new(guild_id),
                            )
                            .await?;
                            info!("Registered commands in guild {}", guild_id);
                        }
                        None => {
                            poise::builtins::register_globally(ctx, &framework.options().commands)
                                .await?;
                            info!("Registered commands globally");
                        }
                    }
                }

                // Set bot status
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                let llm: Arc<dyn CompletionProvider> = Arc::new(LlmClient::new(&config));
                let handler = MessageHandler::new(
                    Arc::new(db.clone()),
                    llm,
                    BotIdentity {
                        id: ready.user.id.to_string(),
                        name: ready.user.name.clone(),
                    },
                )
                .with_recent_window(config.recent_message_window);

                Ok(Data {
                    config,
                    db,
                    handler: Arc::new(handler),
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
