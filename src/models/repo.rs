//! Tracked repository model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;

/// A repository registered for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub id: i64,

    /// Owner login (e.g. "rust-lang").
    pub owner: String,

    /// Repository name (e.g. "cargo").
    pub name: String,

    /// Unique "owner/name" form.
    pub full_name: String,

    /// When the repository was registered (Unix).
    pub added_at: i64,

    /// Last successful sync (Unix). NULL until the first sync completes.
    pub last_synced_at: Option<i64>,

    /// Reserved for resumable pagination; the engine does not read it yet.
    pub sync_cursor: Option<String>,
}

/// Register a repository. Returns the existing row if the full name is
/// already tracked.
pub async fn insert_repo(pool: &DbPool, owner: &str, name: &str, now: i64) -> Result<Repo, sqlx::Error> {
    let full_name = format!("{}/{}", owner, name);

    sqlx::query(
        "INSERT INTO repos (owner, name, full_name, added_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(full_name) DO NOTHING",
    )
    .bind(owner)
    .bind(name)
    .bind(&full_name)
    .bind(now)
    .execute(pool)
    .await?;

    get_repo_by_full_name(pool, &full_name)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Look up a repository by ID.
pub async fn get_repo(pool: &DbPool, repo_id: i64) -> Result<Option<Repo>, sqlx::Error> {
    sqlx::query_as::<_, Repo>(
        "SELECT id, owner, name, full_name, added_at, last_synced_at, sync_cursor
         FROM repos WHERE id = ?",
    )
    .bind(repo_id)
    .fetch_optional(pool)
    .await
}

/// Look up a repository by its "owner/name" form.
pub async fn get_repo_by_full_name(
    pool: &DbPool,
    full_name: &str,
) -> Result<Option<Repo>, sqlx::Error> {
    sqlx::query_as::<_, Repo>(
        "SELECT id, owner, name, full_name, added_at, last_synced_at, sync_cursor
         FROM repos WHERE full_name = ?",
    )
    .bind(full_name)
    .fetch_optional(pool)
    .await
}

/// List all tracked repositories.
pub async fn list_repos(pool: &DbPool) -> Result<Vec<Repo>, sqlx::Error> {
    sqlx::query_as::<_, Repo>(
        "SELECT id, owner, name, full_name, added_at, last_synced_at, sync_cursor
         FROM repos ORDER BY full_name",
    )
    .fetch_all(pool)
    .await
}

/// Stamp a repository's last successful sync time.
pub async fn set_last_synced_at(pool: &DbPool, repo_id: i64, at: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE repos SET last_synced_at = ? WHERE id = ?")
        .bind(at)
        .bind(repo_id)
        .execute(pool)
        .await?;
    Ok(())
}
