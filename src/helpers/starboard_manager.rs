use std::collections::HashSet;

use tracing::debug;

use crate::helpers::channels::ChannelClient;
use crate::helpers::starboard::{link_expiry, Database, StarboardLink};
use crate::structs::starboard_message::{HighlightBody, MessageSnapshot, ReactionSignal};
use crate::types::Error;

/// Distinct users reacting with the trigger emoji, with the message author
/// excluded. Roster paging failures count as zero reactions; rosters change
/// under our feet all the time and a dropped recount self-corrects on the
/// next event.
pub async fn qualifying_count(
    channels: &impl ChannelClient,
    message: &MessageSnapshot,
    emoji: &str,
) -> i64 {
    let users = match channels.reaction_users(message.channel_id, message.id, emoji).await {
        Ok(users) => users,
        Err(err) => {
            debug!("failed to page reaction users for message {}: {err}", message.id);
            return 0;
        }
    };

    let mut seen = HashSet::new();
    let mut count = 0i64;
    for user in users {
        if user != message.author_id && seen.insert(user) {
            count += 1;
        }
    }
    count
}

pub async fn handle_reaction_add(
    channels: &impl ChannelClient,
    db: &Database,
    signal: &ReactionSignal,
) -> Result<(), Error> {
    if signal.from_bot {
        return Ok(());
    }

    let config = match db.get_starboard_config(signal.guild_id).await? {
        Some(config) => config,
        None => return Ok(()),
    };

    if signal.emoji != config.emoji {
        return Ok(());
    }

    let message = match channels.fetch_message(signal.channel_id, signal.message_id).await? {
        Some(message) => message,
        None => return Ok(()),
    };

    let stars = qualifying_count(channels, &message, &config.emoji).await;
    debug!(
        "reaction add from user {} on message {}: {stars}/{} stars",
        signal.user_id, signal.message_id, config.threshold
    );

    // An add below threshold never demotes, even if a link somehow exists.
    if stars >= config.threshold {
        upsert_highlight(channels, db, signal.guild_id, &message, stars).await?;
    }

    Ok(())
}

pub async fn handle_reaction_remove(
    channels: &impl ChannelClient,
    db: &Database,
    signal: &ReactionSignal,
) -> Result<(), Error> {
    if signal.from_bot {
        return Ok(());
    }

    let config = match db.get_starboard_config(signal.guild_id).await? {
        Some(config) => config,
        None => return Ok(()),
    };

    if signal.emoji != config.emoji {
        return Ok(());
    }

    let message = match channels.fetch_message(signal.channel_id, signal.message_id).await? {
        Some(message) => message,
        None => return Ok(()),
    };

    let stars = qualifying_count(channels, &message, &config.emoji).await;
    debug!(
        "reaction remove from user {} on message {}: {stars}/{} stars",
        signal.user_id, signal.message_id, config.threshold
    );

    if stars >= config.threshold {
        // Still above threshold: refresh content and count in place.
        upsert_highlight(channels, db, signal.guild_id, &message, stars).await?;
    } else if let Some(link) = db.get_link(signal.message_id, signal.guild_id).await? {
        demote(channels, db, &link).await?;
    }

    Ok(())
}

/// All reactions stripped at once is an unconditional demotion signal; no
/// recount, no config needed since the link already records where the
/// highlight lives.
pub async fn handle_reaction_clear(
    channels: &impl ChannelClient,
    db: &Database,
    message_id: u64,
) -> Result<(), Error> {
    if let Some(link) = db.get_link_by_message(message_id).await? {
        demote(channels, db, &link).await?;
    }
    Ok(())
}

/// Creates or refreshes the highlight post and its link. The stores are
/// reloaded rather than passed through so every call sees current state.
pub async fn upsert_highlight(
    channels: &impl ChannelClient,
    db: &Database,
    guild_id: u64,
    message: &MessageSnapshot,
    stars: i64,
) -> Result<(), Error> {
    let config = match db.get_starboard_config(guild_id).await? {
        Some(config) => config,
        None => return Ok(()),
    };

    let body = build_highlight_body(message, guild_id, stars, &config.emoji);

    // A link whose highlight message no longer fetches is treated as no link
    // at all; a fresh message gets sent and the row overwritten. This is what
    // heals out-of-band deletions.
    let live = match db.get_link(message.id, guild_id).await? {
        Some(link) => {
            let channel_id = link.highlight_channel_id.parse::<u64>()?;
            let message_id = link.highlight_message_id.parse::<u64>()?;
            channels
                .fetch_message(channel_id, message_id)
                .await
                .ok()
                .flatten()
                .map(|_| (channel_id, message_id))
        }
        None => None,
    };

    let (highlight_channel_id, highlight_message_id) = match live {
        Some((channel_id, message_id)) => {
            channels.edit_highlight(channel_id, message_id, &body).await?;
            (channel_id, message_id)
        }
        None => {
            let channel_id = config.channel_id.parse::<u64>()?;
            let message_id = channels.send_highlight(channel_id, &body).await?;
            (channel_id, message_id)
        }
    };

    // If this write fails after a send, the fresh highlight is orphaned until
    // the next qualifying event overwrites it. Accepted drift; see DESIGN.md.
    db.put_link(&StarboardLink {
        original_message_id: message.id.to_string(),
        guild_id: guild_id.to_string(),
        original_channel_id: message.channel_id.to_string(),
        original_author_id: message.author_id.to_string(),
        highlight_message_id: highlight_message_id.to_string(),
        highlight_channel_id: highlight_channel_id.to_string(),
        content: message.content.clone(),
        star_count: stars,
        expires_at: link_expiry(),
    })
    .await?;

    Ok(())
}

async fn demote(
    channels: &impl ChannelClient,
    db: &Database,
    link: &StarboardLink,
) -> Result<(), Error> {
    let channel_id = link.highlight_channel_id.parse::<u64>()?;
    let message_id = link.highlight_message_id.parse::<u64>()?;
    let original_message_id = link.original_message_id.parse::<u64>()?;
    let guild_id = link.guild_id.parse::<u64>()?;

    channels.delete_message(channel_id, message_id).await?;
    db.delete_link(original_message_id, guild_id).await?;

    debug!("demoted message {original_message_id}, removed highlight {message_id}");
    Ok(())
}

pub fn build_highlight_body(
    message: &MessageSnapshot,
    guild_id: u64,
    stars: i64,
    emoji: &str,
) -> HighlightBody {
    let (image_url, attachment_link) = match &message.attachment {
        Some(a) if a.is_image => (Some(a.url.clone()), None),
        Some(a) => (None, Some(format!("[{}]({})", a.filename, a.url))),
        None => (None, None),
    };

    HighlightBody {
        author_name: message.author_name.clone(),
        author_icon_url: message.author_icon_url.clone(),
        content: message.content.clone(),
        image_url,
        attachment_link,
        star_count: stars,
        emoji: emoji.to_string(),
        jump_url: format!(
            "https://discord.com/channels/{}/{}/{}",
            guild_id, message.channel_id, message.id
        ),
        timestamp: message.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::structs::starboard_message::AttachmentPreview;

    const GUILD: u64 = 1;
    const ORIGIN_CHANNEL: u64 = 7;
    const HIGHLIGHT_CHANNEL: u64 = 500;
    const AUTHOR: u64 = 100;
    const MSG: u64 = 42;

    #[derive(Default)]
    struct FakeChannels {
        messages: Mutex<HashMap<(u64, u64), MessageSnapshot>>,
        reactors: Mutex<HashMap<(u64, String), Vec<u64>>>,
        sent: Mutex<Vec<(u64, HighlightBody)>>,
        edits: Mutex<Vec<(u64, u64, HighlightBody)>>,
        deletes: Mutex<Vec<(u64, u64)>>,
        next_id: AtomicU64,
        fail_rosters: AtomicBool,
    }

    impl FakeChannels {
        fn insert_message(&self, message: MessageSnapshot) {
            self.messages
                .lock()
                .unwrap()
                .insert((message.channel_id, message.id), message);
        }

        fn set_reactors(&self, message_id: u64, emoji: &str, users: &[u64]) {
            self.reactors
                .lock()
                .unwrap()
                .insert((message_id, emoji.to_string()), users.to_vec());
        }

        fn remove_message(&self, channel_id: u64, message_id: u64) {
            self.messages.lock().unwrap().remove(&(channel_id, message_id));
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn edit_count(&self) -> usize {
            self.edits.lock().unwrap().len()
        }

        fn delete_count(&self) -> usize {
            self.deletes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChannelClient for FakeChannels {
        async fn fetch_message(
            &self,
            channel_id: u64,
            message_id: u64,
        ) -> Result<Option<MessageSnapshot>, Error> {
            Ok(self.messages.lock().unwrap().get(&(channel_id, message_id)).cloned())
        }

        async fn reaction_users(
            &self,
            _channel_id: u64,
            message_id: u64,
            emoji: &str,
        ) -> Result<Vec<u64>, Error> {
            if self.fail_rosters.load(Ordering::SeqCst) {
                return Err("roster fetch failed".into());
            }
            Ok(self
                .reactors
                .lock()
                .unwrap()
                .get(&(message_id, emoji.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn send_highlight(
            &self,
            channel_id: u64,
            body: &HighlightBody,
        ) -> Result<u64, Error> {
            let id = 9000 + self.next_id.fetch_add(1, Ordering::SeqCst);
            self.insert_message(MessageSnapshot {
                id,
                channel_id,
                author_id: 0,
                author_name: body.author_name.clone(),
                author_icon_url: None,
                content: body.content.clone(),
                attachment: None,
                timestamp: body.timestamp,
            });
            self.sent.lock().unwrap().push((channel_id, body.clone()));
            Ok(id)
        }

        async fn edit_highlight(
            &self,
            channel_id: u64,
            message_id: u64,
            body: &HighlightBody,
        ) -> Result<(), Error> {
            self.edits.lock().unwrap().push((channel_id, message_id, body.clone()));
            Ok(())
        }

        async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), Error> {
            self.remove_message(channel_id, message_id);
            self.deletes.lock().unwrap().push((channel_id, message_id));
            Ok(())
        }
    }

    fn message(content: &str) -> MessageSnapshot {
        MessageSnapshot {
            id: MSG,
            channel_id: ORIGIN_CHANNEL,
            author_id: AUTHOR,
            author_name: "rin".into(),
            author_icon_url: Some("https://cdn.example/avatar.png".into()),
            content: content.into(),
            attachment: None,
            timestamp: Utc::now(),
        }
    }

    fn signal(emoji: &str, user_id: u64) -> ReactionSignal {
        ReactionSignal {
            message_id: MSG,
            channel_id: ORIGIN_CHANNEL,
            guild_id: GUILD,
            emoji: emoji.into(),
            user_id,
            from_bot: false,
        }
    }

    async fn setup(threshold: i64) -> (FakeChannels, Database) {
        let db = Database::in_memory().await;
        db.set_starboard_config(GUILD, HIGHLIGHT_CHANNEL, "⭐", threshold)
            .await
            .unwrap();
        let channels = FakeChannels::default();
        channels.insert_message(message("look at this"));
        (channels, db)
    }

    async fn highlight_id(db: &Database) -> u64 {
        db.get_link(MSG, GUILD)
            .await
            .unwrap()
            .unwrap()
            .highlight_message_id
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn threshold_crossing_creates_one_highlight() {
        let (channels, db) = setup(3).await;

        channels.set_reactors(MSG, "⭐", &[11]);
        handle_reaction_add(&channels, &db, &signal("⭐", 11)).await.unwrap();
        channels.set_reactors(MSG, "⭐", &[11, 12]);
        handle_reaction_add(&channels, &db, &signal("⭐", 12)).await.unwrap();

        assert_eq!(channels.sent_count(), 0);
        assert!(db.get_link(MSG, GUILD).await.unwrap().is_none());

        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);
        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();

        assert_eq!(channels.sent_count(), 1);
        let (channel_id, body) = channels.sent.lock().unwrap()[0].clone();
        assert_eq!(channel_id, HIGHLIGHT_CHANNEL);
        assert_eq!(body.star_count, 3);
        assert_eq!(body.emoji, "⭐");
        assert!(body.jump_url.ends_with(&format!("{GUILD}/{ORIGIN_CHANNEL}/{MSG}")));
    }

    #[tokio::test]
    async fn self_reaction_is_excluded() {
        let channels = FakeChannels::default();
        let msg = message("self promo");
        channels.set_reactors(MSG, "⭐", &[AUTHOR, 11, 12]);

        assert_eq!(qualifying_count(&channels, &msg, "⭐").await, 2);

        channels.set_reactors(MSG, "⭐", &[AUTHOR]);
        assert_eq!(qualifying_count(&channels, &msg, "⭐").await, 0);
    }

    #[tokio::test]
    async fn duplicate_reactors_count_once() {
        let channels = FakeChannels::default();
        let msg = message("hm");
        channels.set_reactors(MSG, "⭐", &[11, 11, 12]);

        assert_eq!(qualifying_count(&channels, &msg, "⭐").await, 2);
    }

    #[tokio::test]
    async fn roster_failure_counts_as_zero() {
        let channels = FakeChannels::default();
        channels.fail_rosters.store(true, Ordering::SeqCst);

        assert_eq!(qualifying_count(&channels, &message("x"), "⭐").await, 0);
    }

    #[tokio::test]
    async fn redelivered_event_edits_instead_of_duplicating() {
        let (channels, db) = setup(3).await;
        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);

        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();
        let first = highlight_id(&db).await;

        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();

        assert_eq!(channels.sent_count(), 1);
        assert_eq!(channels.edit_count(), 1);
        assert_eq!(highlight_id(&db).await, first);
    }

    #[tokio::test]
    async fn drop_below_threshold_demotes() {
        let (channels, db) = setup(3).await;
        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);
        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();
        let promoted = highlight_id(&db).await;

        channels.set_reactors(MSG, "⭐", &[11, 12]);
        handle_reaction_remove(&channels, &db, &signal("⭐", 13)).await.unwrap();

        assert_eq!(channels.delete_count(), 1);
        assert_eq!(channels.deletes.lock().unwrap()[0], (HIGHLIGHT_CHANNEL, promoted));
        assert!(db.get_link(MSG, GUILD).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_above_threshold_refreshes_in_place() {
        let (channels, db) = setup(2).await;
        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);
        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();

        channels.set_reactors(MSG, "⭐", &[11, 12]);
        handle_reaction_remove(&channels, &db, &signal("⭐", 13)).await.unwrap();

        assert_eq!(channels.sent_count(), 1);
        assert_eq!(channels.edit_count(), 1);
        assert_eq!(channels.delete_count(), 0);
        let link = db.get_link(MSG, GUILD).await.unwrap().unwrap();
        assert_eq!(link.star_count, 2);
    }

    #[tokio::test]
    async fn add_below_threshold_never_demotes() {
        let (channels, db) = setup(3).await;
        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);
        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();

        // Roster shrank between events; an add observing the low count is
        // still a no-op on the demotion side.
        channels.set_reactors(MSG, "⭐", &[11, 12]);
        handle_reaction_add(&channels, &db, &signal("⭐", 14)).await.unwrap();

        assert_eq!(channels.delete_count(), 0);
        assert!(db.get_link(MSG, GUILD).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_always_demotes() {
        let (channels, db) = setup(3).await;
        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);
        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();

        handle_reaction_clear(&channels, &db, MSG).await.unwrap();

        assert_eq!(channels.delete_count(), 1);
        assert!(db.get_link(MSG, GUILD).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_without_link_is_noop() {
        let (channels, db) = setup(3).await;

        handle_reaction_clear(&channels, &db, MSG).await.unwrap();

        assert_eq!(channels.delete_count(), 0);
    }

    #[tokio::test]
    async fn unconfigured_guild_is_noop() {
        let db = Database::in_memory().await;
        let channels = FakeChannels::default();
        channels.insert_message(message("popular anyway"));
        channels.set_reactors(MSG, "⭐", &[11, 12, 13, 14, 15]);

        handle_reaction_add(&channels, &db, &signal("⭐", 15)).await.unwrap();

        assert_eq!(channels.sent_count(), 0);
        assert!(db.get_link(MSG, GUILD).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_emoji_is_noop() {
        let (channels, db) = setup(1).await;
        channels.set_reactors(MSG, "🔥", &[11, 12]);

        handle_reaction_add(&channels, &db, &signal("🔥", 12)).await.unwrap();

        assert_eq!(channels.sent_count(), 0);
    }

    #[tokio::test]
    async fn bot_reactors_are_ignored() {
        let (channels, db) = setup(1).await;
        channels.set_reactors(MSG, "⭐", &[11]);
        let mut sig = signal("⭐", 11);
        sig.from_bot = true;

        handle_reaction_add(&channels, &db, &sig).await.unwrap();

        assert_eq!(channels.sent_count(), 0);
    }

    #[tokio::test]
    async fn heals_after_out_of_band_deletion() {
        let (channels, db) = setup(3).await;
        channels.set_reactors(MSG, "⭐", &[11, 12, 13]);
        handle_reaction_add(&channels, &db, &signal("⭐", 13)).await.unwrap();
        let first = highlight_id(&db).await;

        // Someone deletes the highlight directly in the channel.
        channels.remove_message(HIGHLIGHT_CHANNEL, first);

        channels.set_reactors(MSG, "⭐", &[11, 12, 13, 14]);
        handle_reaction_add(&channels, &db, &signal("⭐", 14)).await.unwrap();

        assert_eq!(channels.sent_count(), 2);
        let second = highlight_id(&db).await;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn upsert_round_trips_through_link_store() {
        let (channels, db) = setup(3).await;
        let msg = message("round trip");

        upsert_highlight(&channels, &db, GUILD, &msg, 5).await.unwrap();

        let link = db.get_link(MSG, GUILD).await.unwrap().unwrap();
        assert_eq!(link.star_count, 5);
        assert_eq!(link.content, "round trip");
        assert_eq!(link.original_author_id, AUTHOR.to_string());
        let (_, body) = channels.sent.lock().unwrap()[0].clone();
        assert_eq!(body.star_count, 5);
        assert_eq!(channels.sent_count(), 1);
        assert_eq!(link.highlight_message_id.parse::<u64>().unwrap(), 9000);
    }

    #[tokio::test]
    async fn non_image_attachment_becomes_link_field() {
        let mut msg = message("with a file");
        msg.attachment = Some(AttachmentPreview {
            url: "https://cdn.example/notes.txt".into(),
            filename: "notes.txt".into(),
            is_image: false,
        });

        let body = build_highlight_body(&msg, GUILD, 3, "⭐");
        assert!(body.image_url.is_none());
        assert_eq!(
            body.attachment_link.as_deref(),
            Some("[notes.txt](https://cdn.example/notes.txt)")
        );

        msg.attachment.as_mut().unwrap().is_image = true;
        let body = build_highlight_body(&msg, GUILD, 3, "⭐");
        assert_eq!(body.image_url.as_deref(), Some("https://cdn.example/notes.txt"));
        assert!(body.attachment_link.is_none());
    }
}
