//! Typed application configuration backed by the `settings` table.
//!
//! Settings are stored as free-form key/value rows so the presentation layer
//! can write them directly. This module is the single place that parses and
//! validates them, falling back to documented defaults on absent or
//! malformed values.

use serde::Serialize;

use crate::db::pool::DbPool;
use crate::error::AppError;

/// Key holding the JSON string array of exclusion globs.
pub const KEY_EXCLUDE_GLOBS: &str = "exclude_globs";

/// Key holding the churn window size in days (integer-as-string).
pub const KEY_CHURN_WINDOW_DAYS: &str = "churn_window_days";

/// Key holding the GitHub personal access token.
pub const KEY_GITHUB_PAT: &str = "github_pat";

/// Default churn window when the setting is absent or malformed.
pub const DEFAULT_CHURN_WINDOW_DAYS: i64 = 14;

/// Parsed analytics/sync configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    /// File globs excluded from LOC accounting. Empty when unset.
    pub exclude_globs: Vec<String>,

    /// Churn detection window in days.
    pub churn_window_days: i64,

    /// GitHub personal access token, if connected.
    #[serde(skip_serializing)]
    pub github_pat: Option<String>,
}

/// Read one raw setting value.
pub async fn get_setting(pool: &DbPool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

/// Upsert one raw setting value.
pub async fn set_setting(pool: &DbPool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// List all settings as (key, value) pairs.
pub async fn list_settings(pool: &DbPool) -> Result<Vec<(String, Option<String>)>, sqlx::Error> {
    sqlx::query_as("SELECT key, value FROM settings ORDER BY key")
        .fetch_all(pool)
        .await
}

/// Load the typed configuration, applying defaults for anything absent or
/// malformed. Never fails on bad values; the only hard requirement (the
/// access token) is enforced by callers that need it.
pub async fn load_config(pool: &DbPool) -> Result<AppConfig, AppError> {
    let exclude_globs = match get_setting(pool, KEY_EXCLUDE_GLOBS).await? {
        Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(globs) => globs,
            Err(e) => {
                log::warn!("Malformed {} setting ({}); using empty list", KEY_EXCLUDE_GLOBS, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let churn_window_days = match get_setting(pool, KEY_CHURN_WINDOW_DAYS).await? {
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(days) if days > 0 => days,
            _ => {
                log::warn!(
                    "Malformed {} setting ({:?}); using default {}",
                    KEY_CHURN_WINDOW_DAYS,
                    raw,
                    DEFAULT_CHURN_WINDOW_DAYS
                );
                DEFAULT_CHURN_WINDOW_DAYS
            }
        },
        None => DEFAULT_CHURN_WINDOW_DAYS,
    };

    let github_pat = get_setting(pool, KEY_GITHUB_PAT).await?.filter(|v| !v.is_empty());

    Ok(AppConfig {
        exclude_globs,
        churn_window_days,
        github_pat,
    })
}

/// Fetch the access token or fail fast with a configuration error.
pub async fn require_github_pat(pool: &DbPool) -> Result<String, AppError> {
    get_setting(pool, KEY_GITHUB_PAT)
        .await?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::configuration("GitHub not connected: set github_pat in settings"))
}
