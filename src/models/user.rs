//! User (author/reviewer) model.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// A person observed as a PR author or reviewer. Created lazily on first
/// sighting; never deleted by the sync path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,

    /// GitHub login (unique).
    pub github_login: String,

    /// GitHub numeric account ID, when the API exposed it.
    pub github_id: Option<i64>,

    pub avatar_url: Option<String>,

    /// Used to join usage-metering data.
    pub email: Option<String>,

    /// First time this login was observed (Unix).
    pub first_seen_at: i64,
}

/// Resolve (or create) a user by login, refreshing the avatar URL when it
/// changed. Returns the user's row ID.
pub async fn upsert_user(
    conn: &mut SqliteConnection,
    login: &str,
    github_id: Option<i64>,
    avatar_url: Option<&str>,
    now: i64,
) -> Result<i64, sqlx::Error> {
    let existing: Option<(i64, Option<String>)> =
        sqlx::query_as("SELECT id, avatar_url FROM users WHERE github_login = ?")
            .bind(login)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some((id, current_avatar)) = existing {
        if let Some(avatar) = avatar_url {
            if current_avatar.as_deref() != Some(avatar) {
                sqlx::query("UPDATE users SET avatar_url = ? WHERE id = ?")
                    .bind(avatar)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        return Ok(id);
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (github_login, github_id, avatar_url, first_seen_at)
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(login)
    .bind(github_id)
    .bind(avatar_url)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}
