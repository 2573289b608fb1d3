//! Pull request model.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use crate::db::pool::DbPool;

/// State of a pull request. Monotonic in practice: a PR does not revert
/// from `Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

impl From<&str> for PrState {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MERGED" => Self::Merged,
            "CLOSED" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Merged => write!(f, "MERGED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A stored pull request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: i64,

    /// GitHub database ID; the sole identity used for insert-vs-update.
    pub github_id: i64,

    pub repo_id: i64,

    /// Repo-scoped PR number.
    pub number: i64,

    pub title: String,

    /// NULL for deleted accounts.
    pub author_id: Option<i64>,

    /// OPEN, MERGED, CLOSED.
    pub state: String,

    pub is_draft: bool,

    pub created_at: i64,

    /// First non-draft moment; NULL while still a draft.
    pub published_at: Option<i64>,

    pub merged_at: Option<i64>,
    pub closed_at: Option<i64>,

    /// Raw line/file counts as reported by the API.
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,

    /// Line counts over non-excluded files only.
    pub filtered_additions: i64,
    pub filtered_deletions: i64,

    pub url: Option<String>,
}

impl PullRequest {
    /// Parse the state string into an enum.
    pub fn state_enum(&self) -> PrState {
        PrState::from(self.state.as_str())
    }
}

/// Field set written on every PR sighting. Produced by the transform layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PrUpsert {
    pub github_id: i64,
    pub number: i64,
    pub title: String,
    pub state: PrState,
    pub is_draft: bool,
    pub created_at: i64,
    pub published_at: Option<i64>,
    pub merged_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub url: String,
}

/// Prior state of an already-stored PR, read before processing a sighting.
#[derive(Debug, Clone, FromRow)]
pub struct StoredPrState {
    pub id: i64,
    pub state: String,
    pub merged_at: Option<i64>,
}

/// Look up the stored state of a PR by GitHub ID.
pub async fn get_stored_state(
    conn: &mut SqliteConnection,
    github_id: i64,
) -> Result<Option<StoredPrState>, sqlx::Error> {
    sqlx::query_as::<_, StoredPrState>(
        "SELECT id, state, merged_at FROM pull_requests WHERE github_id = ?",
    )
    .bind(github_id)
    .fetch_optional(conn)
    .await
}

/// Upsert a pull request by GitHub ID. Inserts when new, otherwise updates
/// all mutable fields and re-points the repo/author associations.
///
/// Returns the local row ID.
pub async fn upsert_pull_request(
    conn: &mut SqliteConnection,
    pr: &PrUpsert,
    repo_id: i64,
    author_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO pull_requests (
            github_id, repo_id, number, title, author_id, state, is_draft,
            created_at, published_at, merged_at, closed_at,
            additions, deletions, changed_files, url
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(github_id) DO UPDATE SET
            repo_id = excluded.repo_id,
            number = excluded.number,
            title = excluded.title,
            author_id = excluded.author_id,
            state = excluded.state,
            is_draft = excluded.is_draft,
            created_at = excluded.created_at,
            published_at = excluded.published_at,
            merged_at = excluded.merged_at,
            closed_at = excluded.closed_at,
            additions = excluded.additions,
            deletions = excluded.deletions,
            changed_files = excluded.changed_files,
            url = excluded.url
        RETURNING id
        "#,
    )
    .bind(pr.github_id)
    .bind(repo_id)
    .bind(pr.number)
    .bind(&pr.title)
    .bind(author_id)
    .bind(pr.state.to_string())
    .bind(pr.is_draft)
    .bind(pr.created_at)
    .bind(pr.published_at)
    .bind(pr.merged_at)
    .bind(pr.closed_at)
    .bind(pr.additions)
    .bind(pr.deletions)
    .bind(pr.changed_files)
    .bind(&pr.url)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Write the filtered line counts back onto a PR row.
pub async fn set_filtered_stats(
    conn: &mut SqliteConnection,
    pr_id: i64,
    filtered_additions: i64,
    filtered_deletions: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE pull_requests SET filtered_additions = ?, filtered_deletions = ? WHERE id = ?",
    )
    .bind(filtered_additions)
    .bind(filtered_deletions)
    .bind(pr_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// List all PR row IDs (used by the filtered-stats recompute pass).
pub async fn list_pr_ids(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM pull_requests ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fetch a stored pull request by local ID.
pub async fn get_pull_request(
    pool: &DbPool,
    pr_id: i64,
) -> Result<Option<PullRequest>, sqlx::Error> {
    sqlx::query_as::<_, PullRequest>(
        "SELECT id, github_id, repo_id, number, title, author_id, state, is_draft,
                created_at, published_at, merged_at, closed_at,
                additions, deletions, changed_files,
                filtered_additions, filtered_deletions, url
         FROM pull_requests WHERE id = ?",
    )
    .bind(pr_id)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    fn sample_upsert(github_id: i64) -> PrUpsert {
        PrUpsert {
            github_id,
            number: 1,
            title: "Add feature".to_string(),
            state: PrState::Open,
            is_draft: false,
            created_at: 1_700_000_000,
            published_at: Some(1_700_000_000),
            merged_at: None,
            closed_at: None,
            additions: 10,
            deletions: 2,
            changed_files: 1,
            url: "https://github.com/acme/widgets/pull/1".to_string(),
        }
    }

    async fn setup() -> (DbPool, i64, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        let repo = crate::models::repo::insert_repo(&pool, "acme", "widgets", 0)
            .await
            .unwrap();
        (pool, repo.id, dir)
    }

    #[test]
    fn test_state_round_trip() {
        assert_eq!(PrState::from("OPEN"), PrState::Open);
        assert_eq!(PrState::from("merged"), PrState::Merged);
        assert_eq!(PrState::from("Closed"), PrState::Closed);
        assert_eq!(PrState::from("unknown"), PrState::Open);
        assert_eq!(PrState::Merged.to_string(), "MERGED");
    }

    #[tokio::test]
    async fn test_upsert_insert_then_update() {
        let (pool, repo_id, _dir) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let pr = sample_upsert(500);
        let id1 = upsert_pull_request(&mut conn, &pr, repo_id, None).await.unwrap();

        let mut updated = pr.clone();
        updated.state = PrState::Merged;
        updated.merged_at = Some(1_700_100_000);
        updated.title = "Add feature (final)".to_string();
        let id2 = upsert_pull_request(&mut conn, &updated, repo_id, None)
            .await
            .unwrap();

        assert_eq!(id1, id2);

        let row = get_pull_request(&pool, id1).await.unwrap().unwrap();
        assert_eq!(row.state, "MERGED");
        assert_eq!(row.merged_at, Some(1_700_100_000));
        assert_eq!(row.title, "Add feature (final)");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pull_requests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_get_stored_state() {
        let (pool, repo_id, _dir) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        assert!(get_stored_state(&mut conn, 999).await.unwrap().is_none());

        let pr = sample_upsert(999);
        upsert_pull_request(&mut conn, &pr, repo_id, None).await.unwrap();

        let stored = get_stored_state(&mut conn, 999).await.unwrap().unwrap();
        assert_eq!(stored.state, "OPEN");
        assert!(stored.merged_at.is_none());
    }

    #[tokio::test]
    async fn test_set_filtered_stats() {
        let (pool, repo_id, _dir) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let id = upsert_pull_request(&mut conn, &sample_upsert(1), repo_id, None)
            .await
            .unwrap();
        set_filtered_stats(&mut conn, id, 8, 1).await.unwrap();

        let row = get_pull_request(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.filtered_additions, 8);
        assert_eq!(row.filtered_deletions, 1);
    }
}
