//! Per-PR changed file model.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use crate::db::pool::DbPool;

/// A file touched by a pull request. The file set for a PR is replaced
/// wholesale whenever its diff list is re-fetched.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PrFile {
    pub id: i64,
    pub pr_id: i64,
    pub filename: String,
    pub status: Option<String>,
    pub additions: i64,
    pub deletions: i64,
    /// Recomputed whenever the exclusion globs change.
    pub is_excluded: bool,
    pub patch: Option<String>,
}

/// A file row about to be stored (no ID yet).
#[derive(Debug, Clone)]
pub struct NewPrFile {
    pub filename: String,
    pub status: Option<String>,
    pub additions: i64,
    pub deletions: i64,
    pub is_excluded: bool,
    pub patch: Option<String>,
}

/// Delete all stored files for a PR (first half of the wholesale replace).
pub async fn delete_files_for_pr(
    conn: &mut SqliteConnection,
    pr_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pr_files WHERE pr_id = ?")
        .bind(pr_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Insert a batch of file rows for a PR.
pub async fn insert_files(
    conn: &mut SqliteConnection,
    pr_id: i64,
    files: &[NewPrFile],
) -> Result<(), sqlx::Error> {
    for f in files {
        sqlx::query(
            "INSERT INTO pr_files (pr_id, filename, status, additions, deletions, is_excluded, patch)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(pr_id)
        .bind(&f.filename)
        .bind(&f.status)
        .bind(f.additions)
        .bind(f.deletions)
        .bind(f.is_excluded)
        .bind(&f.patch)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// List the stored files for one PR.
pub async fn list_files_for_pr(
    conn: &mut SqliteConnection,
    pr_id: i64,
) -> Result<Vec<PrFile>, sqlx::Error> {
    sqlx::query_as::<_, PrFile>(
        "SELECT id, pr_id, filename, status, additions, deletions, is_excluded, patch
         FROM pr_files WHERE pr_id = ? ORDER BY id",
    )
    .bind(pr_id)
    .fetch_all(conn)
    .await
}

/// Lightweight row for the recompute pass (no patch payload).
#[derive(Debug, Clone, FromRow)]
pub struct FileTag {
    pub id: i64,
    pub filename: String,
    pub is_excluded: bool,
}

/// List every stored file's exclusion tag.
pub async fn list_all_file_tags(pool: &DbPool) -> Result<Vec<FileTag>, sqlx::Error> {
    sqlx::query_as::<_, FileTag>("SELECT id, filename, is_excluded FROM pr_files ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Update a single file's exclusion flag.
pub async fn set_excluded(pool: &DbPool, file_id: i64, excluded: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pr_files SET is_excluded = ? WHERE id = ?")
        .bind(excluded)
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Clear every file's exclusion flag (empty glob list).
pub async fn clear_all_exclusions(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pr_files SET is_excluded = 0")
        .execute(pool)
        .await?;
    Ok(())
}
