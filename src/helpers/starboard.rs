use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePool;

pub(crate) use crate::structs::starboard_message::{StarboardConfig, StarboardLink};

/// Links outlive their last refresh by this much before the sweeper may drop
/// the row. A stale highlight message is left in place; only the mapping goes.
pub const LINK_TTL_DAYS: i64 = 30;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Expiry timestamp for a link written right now.
pub fn link_expiry() -> String {
    (Utc::now() + Duration::days(LINK_TTL_DAYS))
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS starboard_config (
                guild_id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                emoji TEXT NOT NULL,
                threshold INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS starboard_links (
                original_message_id TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                original_channel_id TEXT NOT NULL,
                original_author_id TEXT NOT NULL,
                highlight_message_id TEXT NOT NULL,
                highlight_channel_id TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                star_count INTEGER NOT NULL DEFAULT 1,
                expires_at TEXT NOT NULL,
                PRIMARY KEY (original_message_id, guild_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn get_starboard_config(
        &self,
        guild_id: u64,
    ) -> Result<Option<StarboardConfig>, sqlx::Error> {
        sqlx::query_as::<_, StarboardConfig>("SELECT * FROM starboard_config WHERE guild_id = ?")
            .bind(guild_id.to_string())
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_starboard_config(
        &self,
        guild_id: u64,
        channel_id: u64,
        emoji: &str,
        threshold: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO starboard_config (guild_id, channel_id, emoji, threshold)
             VALUES (?, ?, ?, ?)",
        )
        .bind(guild_id.to_string())
        .bind(channel_id.to_string())
        .bind(emoji)
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_starboard_config(&self, guild_id: u64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM starboard_config WHERE guild_id = ?")
            .bind(guild_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_link(
        &self,
        message_id: u64,
        guild_id: u64,
    ) -> Result<Option<StarboardLink>, sqlx::Error> {
        sqlx::query_as::<_, StarboardLink>(
            "SELECT * FROM starboard_links WHERE original_message_id = ? AND guild_id = ?",
        )
        .bind(message_id.to_string())
        .bind(guild_id.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Reaction-clear gateway events carry no guild id. Message ids are
    /// globally unique snowflakes, so the lookup works without it.
    pub async fn get_link_by_message(
        &self,
        message_id: u64,
    ) -> Result<Option<StarboardLink>, sqlx::Error> {
        sqlx::query_as::<_, StarboardLink>(
            "SELECT * FROM starboard_links WHERE original_message_id = ?",
        )
        .bind(message_id.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn put_link(&self, link: &StarboardLink) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO starboard_links
             (original_message_id, guild_id, original_channel_id, original_author_id,
              highlight_message_id, highlight_channel_id, content, star_count, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&link.original_message_id)
        .bind(&link.guild_id)
        .bind(&link.original_channel_id)
        .bind(&link.original_author_id)
        .bind(&link.highlight_message_id)
        .bind(&link.highlight_channel_id)
        .bind(&link.content)
        .bind(link.star_count)
        .bind(&link.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_link(&self, message_id: u64, guild_id: u64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM starboard_links WHERE original_message_id = ? AND guild_id = ?")
            .bind(message_id.to_string())
            .bind(guild_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn purge_expired_links(&self) -> Result<u64, sqlx::Error> {
        let now = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let result = sqlx::query("DELETE FROM starboard_links WHERE expires_at <= ?")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        // A pooled ":memory:" database is one database per connection, so cap
        // the pool at a single connection for tests.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        Self::with_pool(pool).await.expect("schema setup")
    }
}
