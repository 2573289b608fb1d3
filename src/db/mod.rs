//! Database layer for local SQLite storage.
//!
//! Handles connection pool creation (WAL mode) and schema migrations. All
//! query helpers live next to their row types in `models`.

pub mod pool;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Migrations applied in order. Each entry is recorded in `_migrations`
/// once it has run.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Get the path to the SQLite database file inside a data directory.
pub fn get_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("devtempo.db")
}

/// Initialize the database: create the file if needed and run migrations.
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Migration(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = pool::create_pool(db_path).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run all pending database migrations.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;

        if applied.is_some() {
            continue;
        }

        for statement in split_statements(sql) {
            sqlx::query(&statement).execute(&mut *conn).await?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Split a migration file into individual statements.
///
/// Comment-only lines are dropped; statements end at a top-level semicolon.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        current.push_str(trimmed);
        if trimmed.ends_with(';') {
            current.pop(); // drop the terminator
            statements.push(std::mem::take(&mut current));
        } else {
            current.push(' ');
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_creates_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = initialize(&db_path).await.unwrap();

        assert!(db_path.exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(table_names.contains(&"repos"));
        assert!(table_names.contains(&"users"));
        assert!(table_names.contains(&"pull_requests"));
        assert!(table_names.contains(&"pr_files"));
        assert!(table_names.contains(&"pr_reviews"));
        assert!(table_names.contains(&"sync_jobs"));
        assert!(table_names.contains(&"settings"));
        assert!(table_names.contains(&"ai_usage"));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let _pool1 = initialize(&db_path).await.unwrap();
        let pool2 = initialize(&db_path).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool2)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[test]
    fn test_split_statements() {
        let sql = "-- comment\nCREATE TABLE a (\n  id INTEGER\n);\n\nCREATE INDEX b ON a(id);\n";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
        assert!(stmts[1].starts_with("CREATE INDEX b"));
    }
}
