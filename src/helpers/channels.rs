use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

use crate::structs::starboard_message::{AttachmentPreview, HighlightBody, MessageSnapshot};
use crate::types::Error;

/// Gateway surface the starboard engine drives. Production code goes through
/// the serenity-backed [`DiscordChannels`]; tests swap in an in-memory fake.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// `Ok(None)` when the message no longer exists.
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<Option<MessageSnapshot>, Error>;

    /// Ids of every user currently reacting to the message with `emoji`,
    /// paged through in full. May contain the message author.
    async fn reaction_users(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<Vec<u64>, Error>;

    /// Posts a highlight and returns the new message id.
    async fn send_highlight(&self, channel_id: u64, body: &HighlightBody) -> Result<u64, Error>;

    async fn edit_highlight(
        &self,
        channel_id: u64,
        message_id: u64,
        body: &HighlightBody,
    ) -> Result<(), Error>;

    /// Deleting an already-gone message counts as success.
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), Error>;
}

pub struct DiscordChannels<'a> {
    pub http: &'a serenity::Http,
}

fn is_not_found(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(resp)) => {
            resp.status_code.as_u16() == 404
        }
        _ => false,
    }
}

fn snapshot(message: &serenity::Message) -> MessageSnapshot {
    let attachment = message.attachments.first().map(|a| AttachmentPreview {
        url: a.url.clone(),
        filename: a.filename.clone(),
        is_image: a.width.is_some() && a.height.is_some(),
    });

    MessageSnapshot {
        id: message.id.get(),
        channel_id: message.channel_id.get(),
        author_id: message.author.id.get(),
        author_name: message.author.name.clone(),
        author_icon_url: Some(message.author.face()),
        content: message.content.clone(),
        attachment,
        timestamp: DateTime::<Utc>::from_timestamp(message.timestamp.unix_timestamp(), 0)
            .unwrap_or_else(Utc::now),
    }
}

fn render_highlight(body: &HighlightBody) -> serenity::CreateEmbed {
    let mut author = serenity::CreateEmbedAuthor::new(body.author_name.clone());
    if let Some(url) = &body.author_icon_url {
        author = author.icon_url(url);
    }

    let footer = serenity::CreateEmbedFooter::new(format!("{} {}", body.star_count, body.emoji));

    let mut embed = serenity::CreateEmbed::default()
        .author(author)
        .colour(serenity::Colour::GOLD)
        .field("Source", format!("[Jump to message]({})", body.jump_url), false)
        .footer(footer);

    if !body.content.is_empty() {
        embed = embed.description(body.content.clone());
    }
    if let Some(url) = &body.image_url {
        embed = embed.image(url);
    }
    if let Some(link) = &body.attachment_link {
        embed = embed.field("Attachment", link, false);
    }
    if let Ok(timestamp) = serenity::Timestamp::from_unix_timestamp(body.timestamp.timestamp()) {
        embed = embed.timestamp(timestamp);
    }

    embed
}

#[async_trait]
impl ChannelClient for DiscordChannels<'_> {
    async fn fetch_message(
        &self,
        channel_id: u64,
        message_id: u64,
    ) -> Result<Option<MessageSnapshot>, Error> {
        let channel = serenity::ChannelId::new(channel_id);
        match channel.message(self.http, serenity::MessageId::new(message_id)).await {
            Ok(message) => Ok(Some(snapshot(&message))),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn reaction_users(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<Vec<u64>, Error> {
        let channel = serenity::ChannelId::new(channel_id);
        let message = serenity::MessageId::new(message_id);
        let reaction = serenity::ReactionType::Unicode(emoji.to_string());

        let mut users = Vec::new();
        let mut after: Option<serenity::UserId> = None;
        loop {
            let batch = channel
                .reaction_users(self.http, message, reaction.clone(), Some(100), after)
                .await?;
            let done = batch.len() < 100;
            after = batch.last().map(|user| user.id);
            users.extend(batch.into_iter().map(|user| user.id.get()));
            if done {
                break;
            }
        }

        Ok(users)
    }

    async fn send_highlight(&self, channel_id: u64, body: &HighlightBody) -> Result<u64, Error> {
        let builder = serenity::CreateMessage::new().embed(render_highlight(body));
        let message = serenity::ChannelId::new(channel_id)
            .send_message(self.http, builder)
            .await?;
        Ok(message.id.get())
    }

    async fn edit_highlight(
        &self,
        channel_id: u64,
        message_id: u64,
        body: &HighlightBody,
    ) -> Result<(), Error> {
        let builder = serenity::EditMessage::new().embed(render_highlight(body));
        serenity::ChannelId::new(channel_id)
            .edit_message(self.http, serenity::MessageId::new(message_id), builder)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), Error> {
        let channel = serenity::ChannelId::new(channel_id);
        match channel.delete_message(self.http, serenity::MessageId::new(message_id)).await {
            Ok(()) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
