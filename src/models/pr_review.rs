//! Pull request review model.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// A review on a pull request. Reviews are inserted once, identified by
/// their external review ID, and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PrReview {
    pub id: i64,
    pub pr_id: i64,
    /// NULL for deleted reviewer accounts.
    pub reviewer_id: Option<i64>,
    pub state: String,
    /// NULL for pending reviews.
    pub submitted_at: Option<i64>,
    pub github_id: Option<i64>,
}

/// Insert a review unless its external ID has been seen before.
///
/// Returns true when a row was inserted. Reviews without an external ID
/// are always inserted (the API occasionally omits it for pending reviews).
pub async fn insert_review_if_new(
    conn: &mut SqliteConnection,
    pr_id: i64,
    reviewer_id: Option<i64>,
    state: &str,
    submitted_at: Option<i64>,
    github_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    if let Some(gid) = github_id {
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM pr_reviews WHERE github_id = ?")
                .bind(gid)
                .fetch_optional(&mut *conn)
                .await?;
        if existing.is_some() {
            return Ok(false);
        }
    }

    sqlx::query(
        "INSERT INTO pr_reviews (pr_id, reviewer_id, state, submitted_at, github_id)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(pr_id)
    .bind(reviewer_id)
    .bind(state)
    .bind(submitted_at)
    .bind(github_id)
    .execute(conn)
    .await?;

    Ok(true)
}
