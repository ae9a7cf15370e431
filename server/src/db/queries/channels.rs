use sqlx::SqlitePool;

use crate::db::models::ChannelRow;

/// List all channels, grouped by category and then sorted by name.
pub async fn list_channels(pool: &SqlitePool) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        "SELECT id, name, description, category, is_default, created_at \
         FROM channels ORDER BY category, name",
    )
    .fetch_all(pool)
    .await
}

/// Get a channel by its ID.
pub async fn get_channel(
    pool: &SqlitePool,
    channel_id: &str,
) -> Result<Option<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        "SELECT id, name, description, category, is_default, created_at \
         FROM channels WHERE id = ?",
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await
}

/// Get a channel by its unique name.
pub async fn get_channel_by_name(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        "SELECT id, name, description, category, is_default, created_at \
         FROM channels WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
}
