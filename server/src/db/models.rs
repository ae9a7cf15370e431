use serde::{Deserialize, Serialize};

/// A user's identity record and display attributes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub avatar_color: String,
    pub role: String,
    pub is_online: i32,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

/// A stored channel from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_default: i32,
    pub created_at: String,
}

/// A stored message as written to the log.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub created_at: String,
}

/// A message joined with its author's current display attributes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub avatar_color: String,
    pub role: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub created_at: String,
}
