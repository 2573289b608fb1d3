//! Settings routes.
//!
//! Settings are free-form key/value pairs; the typed view lives in
//! `config`. Changing the exclusion globs kicks off the filtered-stats
//! recompute in the background.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config;
use crate::server::{ApiErr, AppState};
use crate::services::sync_engine;

/// Keys whose values are masked in responses.
const MASKED_KEYS: &[&str] = &[config::KEY_GITHUB_PAT];

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/settings", get(get_settings).put(put_setting))
}

#[derive(Debug, Deserialize)]
struct PutSettingRequest {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct PutSettingResponse {
    saved: bool,
}

fn mask(value: &str) -> String {
    let visible = value.len().min(4);
    format!(
        "{}{}",
        "*".repeat(value.len() - visible),
        &value[value.len() - visible..]
    )
}

/// GET /api/settings: all settings, secrets masked to their last 4 chars.
async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, Option<String>>>, ApiErr> {
    let rows = config::list_settings(&state.pool).await?;

    let mut result = BTreeMap::new();
    for (key, value) in rows {
        let value = match value {
            Some(v) if MASKED_KEYS.contains(&key.as_str()) && !v.is_empty() => Some(mask(&v)),
            other => other,
        };
        result.insert(key, value);
    }

    Ok(Json(result))
}

/// PUT /api/settings: upsert one setting. An `exclude_globs` change spawns
/// the recompute pass; callers poll derived data rather than waiting.
async fn put_setting(
    State(state): State<AppState>,
    Json(request): Json<PutSettingRequest>,
) -> Result<Json<PutSettingResponse>, ApiErr> {
    if request.key.is_empty() {
        return Err(crate::error::AppError::invalid_input_field("key is required", "key").into());
    }

    config::set_setting(&state.pool, &request.key, &request.value).await?;

    if request.key == config::KEY_EXCLUDE_GLOBS {
        sync_engine::spawn_recompute(state.pool.clone());
    }

    Ok(Json(PutSettingResponse { saved: true }))
}
