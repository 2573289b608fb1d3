//! Analytics routes: churn and outliers.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::server::{ApiErr, AppState};
use crate::services::churn::{self, WeeklyChurn};
use crate::services::outliers::{self, Outlier};

/// Default lookback when no range is given.
const DEFAULT_RANGE_SECS: i64 = 30 * 86_400;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/metrics/churn", get(get_churn))
        .route("/api/metrics/outliers", get(get_outliers))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    start_date: Option<i64>,
    end_date: Option<i64>,
}

impl RangeQuery {
    fn resolve(&self) -> (i64, i64) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let end = self.end_date.unwrap_or(now);
        let start = self.start_date.unwrap_or(end - DEFAULT_RANGE_SECS);
        (start, end)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutliersResponse {
    outliers: Vec<Outlier>,
    trend_outliers: Vec<Outlier>,
}

/// GET /api/metrics/churn: weekly churn series for the range.
async fn get_churn(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<WeeklyChurn>>, ApiErr> {
    let (start, end) = range.resolve();
    Ok(Json(churn::churn_rate(&state.pool, start, end).await?))
}

/// GET /api/metrics/outliers: detector output plus trend declines.
async fn get_outliers(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<OutliersResponse>, ApiErr> {
    let (start, end) = range.resolve();
    let outliers = outliers::outliers(&state.pool, start, end).await?;
    let trend_outliers = outliers::trend_outliers(&state.pool, end).await?;
    Ok(Json(OutliersResponse {
        outliers,
        trend_outliers,
    }))
}
