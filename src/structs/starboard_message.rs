use chrono::{DateTime, Utc};

/// Per-guild starboard settings. Ids are stored as TEXT in sqlite and parsed
/// to u64 where the engine needs them.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StarboardConfig {
    pub guild_id: String,
    pub channel_id: String,
    pub emoji: String,
    pub threshold: i64,
}

/// Durable association between an original message and its repost in the
/// highlight channel. At most one live row per (original_message_id, guild_id).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StarboardLink {
    pub original_message_id: String,
    pub guild_id: String,
    pub original_channel_id: String,
    pub original_author_id: String,
    pub highlight_message_id: String,
    pub highlight_channel_id: String,
    pub content: String,
    pub star_count: i64,
    pub expires_at: String,
}

/// What a single gateway reaction event tells us. Rebuilt from scratch for
/// every event; never persisted. The original author's id comes from the
/// fetched message, not from here.
#[derive(Debug, Clone)]
pub struct ReactionSignal {
    pub message_id: u64,
    pub channel_id: u64,
    pub guild_id: u64,
    pub emoji: String,
    pub user_id: u64,
    pub from_bot: bool,
}

#[derive(Debug, Clone)]
pub struct AttachmentPreview {
    pub url: String,
    pub filename: String,
    pub is_image: bool,
}

/// Gateway-neutral view of a fetched message, enough to count reactions and
/// render a highlight.
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_icon_url: Option<String>,
    pub content: String,
    pub attachment: Option<AttachmentPreview>,
    pub timestamp: DateTime<Utc>,
}

/// Rendered contents of a highlight-channel post. The serenity layer turns
/// this into an embed; tests assert on it directly.
#[derive(Debug, Clone)]
pub struct HighlightBody {
    pub author_name: String,
    pub author_icon_url: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub attachment_link: Option<String>,
    pub star_count: i64,
    pub emoji: String,
    pub jump_url: String,
    pub timestamp: DateTime<Utc>,
}
