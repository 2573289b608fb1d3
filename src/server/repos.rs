//! Repository registration and connection-test routes.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::AppError;
use crate::models::repo::{self, Repo};
use crate::server::{ApiErr, AppState};
use crate::services::github_client::{GitHubClient, GitHubClientConfig};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/repos", get(list_repos).post(add_repo))
        .route("/api/connection", get(test_connection))
}

#[derive(Debug, Deserialize)]
struct AddRepoRequest {
    owner: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// GET /api/repos: all tracked repositories.
async fn list_repos(State(state): State<AppState>) -> Result<Json<Vec<Repo>>, ApiErr> {
    Ok(Json(repo::list_repos(&state.pool).await?))
}

/// POST /api/repos: register a repository for ingestion.
async fn add_repo(
    State(state): State<AppState>,
    Json(request): Json<AddRepoRequest>,
) -> Result<Json<Repo>, ApiErr> {
    let owner = request.owner.trim();
    let name = request.name.trim();
    if owner.is_empty() || name.is_empty() {
        return Err(AppError::invalid_input("owner and name are required").into());
    }
    if owner.contains('/') || name.contains('/') {
        return Err(AppError::invalid_input("owner and name must not contain '/'").into());
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let repo = repo::insert_repo(&state.pool, owner, name, now).await?;
    Ok(Json(repo))
}

/// GET /api/connection: validate the stored token against the API.
///
/// Reports failure in the body rather than as an error status so the
/// settings screen can render it directly.
async fn test_connection(State(state): State<AppState>) -> Result<Json<ConnectionResponse>, ApiErr> {
    let result = async {
        let token = config::require_github_pat(&state.pool).await?;
        let client = GitHubClient::new(GitHubClientConfig::with_token(token))?;
        client.test_connection().await
    }
    .await;

    Ok(Json(match result {
        Ok(login) => ConnectionResponse {
            ok: true,
            login: Some(login),
            error: None,
        },
        Err(e) => ConnectionResponse {
            ok: false,
            login: None,
            error: Some(e.to_string()),
        },
    }))
}
