//! SQLite connection pool with WAL mode.
//!
//! WAL lets the analytics queries read while a sync run writes, which is the
//! normal state of this process.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Create a new connection pool with WAL mode enabled.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
pub async fn create_pool(db_path: &Path) -> Result<DbPool, sqlx::Error> {
    let db_url = format!("sqlite:{}", db_path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        // Create the database file if it doesn't exist
        .create_if_missing(true)
        // WAL for concurrent reads during sync writes
        .journal_mode(SqliteJournalMode::Wal)
        // NORMAL synchronous mode balances safety and performance
        .synchronous(SqliteSynchronous::Normal)
        // Foreign keys enforce the repo -> PR -> file/review cascade
        .foreign_keys(true)
        // Sync writes and recompute passes can contend briefly
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        // SQLite handles concurrency via WAL; a small pool is plenty
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    // Verify WAL mode is enabled
    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;

    debug_assert!(
        mode.0.to_lowercase() == "wal",
        "WAL mode should be enabled, got: {}",
        mode.0
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_pool_with_wal() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = create_pool(&db_path).await.unwrap();

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        let fk: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk.0, 1);
    }

    #[tokio::test]
    async fn test_pool_creates_database_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("devtempo.db");

        let pool = create_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(result.0, 1);
    }
}
