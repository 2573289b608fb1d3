//! Sync trigger and status routes.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::models::sync_job::{self, SyncJob};
use crate::server::{ApiErr, AppState};
use crate::services::github_client::{GitHubClient, GitHubClientConfig};
use crate::services::sync_engine::SyncEngine;
use crate::services::sync_lock::SyncScope;

/// How many recent jobs the status endpoint returns.
const RECENT_JOBS: i64 = 10;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/sync", get(get_sync_status).post(trigger_sync))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatusResponse {
    sync_in_progress: bool,
    running_scope: Option<SyncScope>,
    jobs: Vec<SyncJob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    repo_id: Option<i64>,
    #[serde(default)]
    backfill: bool,
}

#[derive(Debug, Serialize)]
struct TriggerSyncResponse {
    started: bool,
}

/// GET /api/sync: lock state plus the most recent job rows.
async fn get_sync_status(
    State(state): State<AppState>,
) -> Result<Json<SyncStatusResponse>, ApiErr> {
    let jobs = sync_job::recent_jobs(&state.pool, RECENT_JOBS).await?;
    Ok(Json(SyncStatusResponse {
        sync_in_progress: state.sync_lock.is_busy(),
        running_scope: state.sync_lock.running_scope(),
        jobs,
    }))
}

/// POST /api/sync: start a background sync of one repo (or the fleet).
///
/// Rejects with 409 while another sync holds the lock. The sync itself runs
/// detached; poll GET /api/sync for the outcome.
async fn trigger_sync(
    State(state): State<AppState>,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<TriggerSyncResponse>, ApiErr> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let scope = match request.repo_id {
        Some(repo_id) => SyncScope::Repo(repo_id),
        None => SyncScope::All,
    };

    let permit = state.sync_lock.try_acquire(scope)?;

    let pool = state.pool.clone();
    let cancel = state.shutdown.clone();
    let backfill = request.backfill;

    tokio::spawn(async move {
        // Holds the lock for the lifetime of the run, panics included.
        let _permit = permit;

        let outcome = async {
            let token = config::require_github_pat(&pool).await?;
            let client = GitHubClient::new(GitHubClientConfig::with_token(token))?;
            let engine = SyncEngine::new(pool.clone(), client).with_cancellation(cancel);

            match scope {
                SyncScope::Repo(repo_id) => engine.sync_repo(repo_id, backfill).await,
                SyncScope::All => engine.sync_all(backfill).await,
            }
        }
        .await;

        if let Err(e) = outcome {
            // Job rows carry the durable failure record; this is for the
            // operator's console.
            log::error!("[sync] Background sync error: {}", e);
        }
    });

    Ok(Json(TriggerSyncResponse { started: true }))
}
