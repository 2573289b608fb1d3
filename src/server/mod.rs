//! Operational HTTP surface.
//!
//! Thin glue over the engines: trigger/inspect syncs, read and write
//! settings, register repositories, and serve the churn/outlier analytics.
//! Everything of substance lives in `services`.

pub mod metrics;
pub mod repos;
pub mod settings;
pub mod sync;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::services::sync_lock::SyncLock;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,

    /// Process-wide sync lock; POST /api/sync rejects while held.
    pub sync_lock: Arc<SyncLock>,

    /// Fires on shutdown; in-flight syncs stop at the next page boundary.
    pub shutdown: CancellationToken,
}

/// JSON error body.
#[derive(Serialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Wrapper to make `AppError` usable as an axum error response.
pub struct ApiErr(pub AppError);

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            AppError::Configuration { .. } => (StatusCode::BAD_REQUEST, "CONFIGURATION"),
            AppError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::GitHubApi { .. } | AppError::Network { .. } => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        (
            status,
            Json(ApiError {
                code: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<sqlx::Error> for ApiErr {
    fn from(err: sqlx::Error) -> Self {
        Self(AppError::from(err))
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(sync::routes())
        .merge(settings::routes())
        .merge(repos::routes())
        .merge(metrics::routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<(), AppError> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind to {}: {}", addr, e)))?;

    log::info!("[server] Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    log::info!("[server] Stopped");
    Ok(())
}
