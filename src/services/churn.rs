//! Code-churn detection.
//!
//! Estimates what fraction of newly added lines were modified or removed
//! again by a later merge within a rolling window. This is an O(n²) scan
//! over merged PRs in the requested range, but the inner loop breaks as
//! soon as the window is exceeded, which bounds it in practice.

use serde::Serialize;
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap};

use crate::config;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::services::stats::{epoch_week, format_date, round1};

/// One week of churn data.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyChurn {
    /// ISO date of the week bucket start.
    pub week: String,

    /// Churned / total as a percentage, one decimal place.
    pub rate: f64,

    pub churned_lines: i64,
    pub total_lines: i64,
}

#[derive(Debug, FromRow)]
struct MergedPr {
    id: i64,
    merged_at: i64,
}

#[derive(Debug, FromRow)]
struct ChurnFile {
    pr_id: i64,
    filename: String,
    additions: i64,
    deletions: i64,
}

/// Weekly churn rate over `[start_date, end_date]`.
///
/// The churn window size comes from the `churn_window_days` setting
/// (default 14).
pub async fn churn_rate(
    pool: &DbPool,
    start_date: i64,
    end_date: i64,
) -> Result<Vec<WeeklyChurn>, AppError> {
    let cfg = config::load_config(pool).await?;
    let window_secs = cfg.churn_window_days * 86_400;

    let merged: Vec<MergedPr> = sqlx::query_as(
        "SELECT id, merged_at FROM pull_requests
         WHERE state = 'MERGED' AND merged_at IS NOT NULL
           AND merged_at >= ? AND merged_at <= ?
         ORDER BY merged_at",
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    if merged.is_empty() {
        return Ok(Vec::new());
    }

    // Non-excluded files only; excluded files never count toward churn.
    let files: Vec<ChurnFile> = sqlx::query_as(
        "SELECT pr_id, filename, additions, deletions FROM pr_files WHERE is_excluded = 0",
    )
    .fetch_all(pool)
    .await?;

    let mut files_by_pr: HashMap<i64, Vec<ChurnFile>> = HashMap::new();
    for f in files {
        files_by_pr.entry(f.pr_id).or_default().push(f);
    }

    let mut by_week: BTreeMap<i64, (i64, i64)> = BTreeMap::new();

    for (i, pr) in merged.iter().enumerate() {
        let Some(pr_files) = files_by_pr.get(&pr.id) else {
            continue;
        };
        let week = epoch_week(pr.merged_at);
        let bucket = by_week.entry(week).or_insert((0, 0));

        for file in pr_files {
            bucket.1 += file.additions;

            // First later merge within the window touching the same path
            // wins; a file counts once per origin PR.
            for later in &merged[i + 1..] {
                if later.merged_at - pr.merged_at > window_secs {
                    break;
                }
                let overlap = files_by_pr
                    .get(&later.id)
                    .and_then(|fs| fs.iter().find(|f| f.filename == file.filename));
                if let Some(overlap) = overlap {
                    bucket.0 += file.additions.min(overlap.additions + overlap.deletions);
                    break;
                }
            }
        }
    }

    Ok(by_week
        .into_iter()
        .map(|(week, (churned, total))| WeeklyChurn {
            week: format_date(week),
            rate: if total > 0 {
                round1(churned as f64 / total as f64 * 100.0)
            } else {
                0.0
            },
            churned_lines: churned,
            total_lines: total,
        })
        .collect())
}
