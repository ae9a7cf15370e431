use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{HistoryRow, MessageRow};

/// Append a message to a channel's log. The store assigns the ID and timestamp.
pub async fn insert_message(
    pool: &SqlitePool,
    channel_id: &str,
    user_id: &str,
    content: &str,
    reply_to_id: Option<&str>,
) -> Result<MessageRow, sqlx::Error> {
    // Stamped by the insert itself as fixed-width UTC.
    sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, channel_id, user_id, content, reply_to_id, created_at) \
         VALUES (?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         RETURNING id, channel_id, user_id, content, reply_to_id, created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(channel_id)
    .bind(user_id)
    .bind(content)
    .bind(reply_to_id)
    .fetch_one(pool)
    .await
}

/// Get a single stored message by ID.
pub async fn get_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "SELECT id, channel_id, user_id, content, reply_to_id, created_at \
         FROM messages WHERE id = ?",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await
}

/// Fetch the most recent `limit` messages of a channel, oldest first, joined with
/// each author's current display attributes.
pub async fn recent_messages(
    pool: &SqlitePool,
    channel_id: &str,
    limit: i64,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRow>(
        "SELECT * FROM ( \
             SELECT m.id, m.channel_id, m.user_id, u.username, u.avatar_color, u.role, \
                    m.content, m.reply_to_id, m.created_at, m.rowid AS seq \
             FROM messages m \
             JOIN users u ON u.id = m.user_id \
             WHERE m.channel_id = ? \
             ORDER BY m.rowid DESC \
             LIMIT ? \
         ) ORDER BY seq ASC",
    )
    .bind(channel_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
