use poise::serenity_prelude as serenity;
use serenity::Mentionable;

pub(crate) use crate::types::{Context, Data, Error};

pub fn all_commands() -> Vec<poise::Command<Data, Error>> {
    vec![starboard()]
}

/// A single default Discord emoji, nothing custom or animated. Custom emoji
/// render as `<:name:id>` and fail the one-character check by construction.
fn is_single_printable(emoji: &str) -> bool {
    let mut chars = emoji.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => !c.is_control() && !c.is_whitespace(),
        _ => false,
    }
}

#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("setup", "remove")
)]
pub async fn starboard(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Subcommands: `starboard setup <channel> <emoji> <threshold>`, `starboard remove`")
        .await?;
    Ok(())
}

#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn setup(
    ctx: Context<'_>,
    #[channel_types("Text")] channel: serenity::GuildChannel,
    emoji: String,
    threshold: i64,
) -> Result<(), Error> {
    let guild_id = match ctx.guild_id() {
        Some(id) => id,
        None => return Ok(()),
    };

    if !is_single_printable(&emoji) {
        ctx.say("Please use a single default Discord emoji.").await?;
        return Ok(());
    }

    if threshold < 1 {
        ctx.say("Threshold must be at least 1.").await?;
        return Ok(());
    }

    if channel.kind != serenity::ChannelType::Text {
        ctx.say("The starboard channel must be a text channel.").await?;
        return Ok(());
    }

    let bot_id = ctx.serenity_context().cache.current_user().id;
    let can_send = match ctx.guild() {
        Some(guild) => guild
            .members
            .get(&bot_id)
            .map(|me| guild.user_permissions_in(&channel, me).send_messages())
            .unwrap_or(false),
        None => false,
    };
    if !can_send {
        ctx.say(format!(
            "I don't have permission to send messages in {}.",
            channel.mention()
        ))
        .await?;
        return Ok(());
    }

    ctx.data()
        .starboard
        .set_starboard_config(guild_id.get(), channel.id.get(), &emoji, threshold)
        .await?;

    ctx.say(format!(
        "Starboard configured: channel {}, emoji {}, threshold {}.",
        channel.mention(),
        emoji,
        threshold
    ))
    .await?;
    Ok(())
}

#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn remove(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = match ctx.guild_id() {
        Some(id) => id,
        None => return Ok(()),
    };

    let existed = ctx.data().starboard.remove_starboard_config(guild_id.get()).await?;

    if existed {
        ctx.say("Starboard configuration removed.").await?;
    } else {
        ctx.say("No starboard configuration found for this server.").await?;
    }
    Ok(())
}
