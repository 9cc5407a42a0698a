use poise::serenity_prelude as serenity;
use serenity::FullEvent;
use std::env;
use tracing::{error, warn};

mod commands;
mod helpers;
mod structs;
mod types;

use types::{Data, Error};

use crate::commands::all_commands;
use crate::helpers::channels::DiscordChannels;
use crate::helpers::link_sweeper::link_sweeper;
use crate::helpers::starboard::Database;
use crate::helpers::starboard_manager::{
    handle_reaction_add, handle_reaction_clear, handle_reaction_remove,
};
use crate::structs::starboard_message::ReactionSignal;

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match &error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {}", error),
        poise::FrameworkError::Command { ctx, error, .. }
        | poise::FrameworkError::ArgumentParse { ctx, error, .. } => {
            error!("Command `{}` failed: {:?}", ctx.command().name, error);
        }
        _ => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Unhandled framework error: {}", e);
            }
        }
    }
}

/// DM reactions carry no guild id and are never starboard material.
fn reaction_signal(reaction: &serenity::Reaction) -> Option<ReactionSignal> {
    let guild_id = reaction.guild_id?.get();
    Some(ReactionSignal {
        message_id: reaction.message_id.get(),
        channel_id: reaction.channel_id.get(),
        guild_id,
        emoji: reaction.emoji.to_string(),
        user_id: reaction.user_id.map(|id| id.get()).unwrap_or_default(),
        from_bot: reaction.member.as_ref().map(|m| m.user.bot).unwrap_or(false),
    })
}

// Every reaction event is handled to completion here; failures are logged and
// dropped so one bad event never takes the process down with it.
async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    let channels = DiscordChannels { http: &ctx.http };

    match event {
        FullEvent::ReactionAdd { add_reaction } => {
            if let Some(signal) = reaction_signal(add_reaction) {
                if let Err(err) = handle_reaction_add(&channels, &data.starboard, &signal).await {
                    warn!("reaction add on message {} dropped: {err}", signal.message_id);
                }
            }
        }
        FullEvent::ReactionRemove { removed_reaction } => {
            if let Some(signal) = reaction_signal(removed_reaction) {
                if let Err(err) = handle_reaction_remove(&channels, &data.starboard, &signal).await
                {
                    warn!("reaction remove on message {} dropped: {err}", signal.message_id);
                }
            }
        }
        FullEvent::ReactionRemoveAll { removed_from_message_id, .. } => {
            let message_id = removed_from_message_id.get();
            if let Err(err) = handle_reaction_clear(&channels, &data.starboard, message_id).await {
                warn!("reaction clear on message {message_id} dropped: {err}");
            }
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = env::var("DISCORD_TOKEN").expect("Missing DISCORD_TOKEN");
    let db_url = env::var("DATABASE_URL").expect("Missing DATABASE_URL");

    let starboard = Database::new(&db_url).await?;

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: all_commands(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some("s".into()),
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tokio::spawn(link_sweeper(starboard.clone()));

                Ok(Data { starboard })
            })
        })
        .build();

    let mut client = serenity::Client::builder(token, intents)
        .framework(framework)
        .await?;

    client.start().await?;

    Ok(())
}
