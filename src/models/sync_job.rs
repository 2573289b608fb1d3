//! Sync job model.
//!
//! One row per sync invocation. Rows are the only durable signal of sync
//! progress exposed outward; `prs_processed` is updated per page and can be
//! polled. Status transitions only RUNNING -> {COMPLETED, FAILED}.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;

/// Status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A sync job row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub id: i64,
    /// NULL for a whole-fleet sync.
    pub repo_id: Option<i64>,
    pub status: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub prs_processed: i64,
    pub error: Option<String>,
}

impl SyncJob {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> JobStatus {
        JobStatus::from(self.status.as_str())
    }
}

/// Create a RUNNING job row at sync start. Returns the job ID.
pub async fn create_job(pool: &DbPool, repo_id: Option<i64>, now: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO sync_jobs (repo_id, status, started_at, prs_processed)
         VALUES (?, ?, ?, 0) RETURNING id",
    )
    .bind(repo_id)
    .bind(JobStatus::Running.to_string())
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Update the processed-PR count (called after each page).
pub async fn update_progress(
    pool: &DbPool,
    job_id: i64,
    prs_processed: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_jobs SET prs_processed = ? WHERE id = ?")
        .bind(prs_processed)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Finalize a job as COMPLETED. Terminal; the row is never mutated again.
pub async fn complete_job(
    pool: &DbPool,
    job_id: i64,
    prs_processed: i64,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_jobs SET status = ?, completed_at = ?, prs_processed = ? WHERE id = ?",
    )
    .bind(JobStatus::Completed.to_string())
    .bind(now)
    .bind(prs_processed)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Finalize a job as FAILED with a human-readable message.
pub async fn fail_job(
    pool: &DbPool,
    job_id: i64,
    error: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sync_jobs SET status = ?, completed_at = ?, error = ? WHERE id = ?")
        .bind(JobStatus::Failed.to_string())
        .bind(now)
        .bind(error)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch the most recent jobs, newest first.
pub async fn recent_jobs(pool: &DbPool, limit: i64) -> Result<Vec<SyncJob>, sqlx::Error> {
    sqlx::query_as::<_, SyncJob>(
        "SELECT id, repo_id, status, started_at, completed_at, prs_processed, error
         FROM sync_jobs ORDER BY started_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Fail any job still RUNNING from a previous process run. Called once at
/// startup; a RUNNING row can only be orphaned, since syncs never outlive
/// the process.
pub async fn fail_orphaned_jobs(pool: &DbPool, now: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE sync_jobs SET status = ?, completed_at = ?, error = ? WHERE status = ?",
    )
    .bind(JobStatus::Failed.to_string())
    .bind(now)
    .bind("Sync interrupted by shutdown")
    .bind(JobStatus::Running.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    async fn setup() -> (DbPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        (pool, dir)
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (pool, _dir) = setup().await;

        let job_id = create_job(&pool, None, 100).await.unwrap();
        update_progress(&pool, job_id, 42).await.unwrap();
        complete_job(&pool, job_id, 42, 200).await.unwrap();

        let jobs = recent_jobs(&pool, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status_enum(), JobStatus::Completed);
        assert_eq!(jobs[0].prs_processed, 42);
        assert_eq!(jobs[0].completed_at, Some(200));
    }

    #[tokio::test]
    async fn test_fail_job_records_message() {
        let (pool, _dir) = setup().await;

        let job_id = create_job(&pool, None, 100).await.unwrap();
        fail_job(&pool, job_id, "GitHub API error: 502", 150).await.unwrap();

        let jobs = recent_jobs(&pool, 10).await.unwrap();
        assert_eq!(jobs[0].status_enum(), JobStatus::Failed);
        assert_eq!(jobs[0].error.as_deref(), Some("GitHub API error: 502"));
    }

    #[tokio::test]
    async fn test_fail_orphaned_jobs() {
        let (pool, _dir) = setup().await;

        let running = create_job(&pool, None, 100).await.unwrap();
        let done = create_job(&pool, None, 110).await.unwrap();
        complete_job(&pool, done, 5, 120).await.unwrap();

        let swept = fail_orphaned_jobs(&pool, 300).await.unwrap();
        assert_eq!(swept, 1);

        let jobs = recent_jobs(&pool, 10).await.unwrap();
        let orphan = jobs.iter().find(|j| j.id == running).unwrap();
        assert_eq!(orphan.status_enum(), JobStatus::Failed);
        let completed = jobs.iter().find(|j| j.id == done).unwrap();
        assert_eq!(completed.status_enum(), JobStatus::Completed);
    }
}
