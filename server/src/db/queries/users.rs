use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::UserRow;

/// Parameters for mirroring an identity into the local user table.
pub struct UpsertUser<'a> {
    pub user_id: &'a str,
    pub username: &'a str,
    pub avatar_color: &'a str,
    pub role: &'a str,
}

/// Insert a user, or refresh the display attributes of an existing one.
pub async fn upsert_user(pool: &SqlitePool, params: &UpsertUser<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (id, username, avatar_color, role) VALUES (?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET username = excluded.username, \
         avatar_color = excluded.avatar_color, role = excluded.role",
    )
    .bind(params.user_id)
    .bind(params.username)
    .bind(params.avatar_color)
    .bind(params.role)
    .execute(pool)
    .await?;
    Ok(())
}

/// Look up a user by ID.
pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, avatar_color, role, is_online, last_seen_at, created_at \
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Flip a user's online flag. Going offline also stamps `last_seen_at`.
pub async fn set_online(pool: &SqlitePool, user_id: &str, online: bool) -> Result<(), sqlx::Error> {
    if online {
        sqlx::query("UPDATE users SET is_online = 1 WHERE id = ?")
            .bind(user_id)
            .execute(pool)
            .await?;
    } else {
        sqlx::query("UPDATE users SET is_online = 0, last_seen_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}
