//! Sync engine for pull-request ingestion.
//!
//! Orchestrates one repository's ingestion: paginate the update-time-
//! descending PR feed, stop at the one-year cutoff, upsert entities, fetch
//! per-PR file diffs, recompute filtered line statistics, and record job
//! status. Also hosts the filtered-stats recompute pass that runs when the
//! exclusion configuration changes.
//!
//! The engine talks to the hosting API through the `PullRequestSource`
//! trait so tests can script the feed.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::pr_file::{self, NewPrFile};
use crate::models::pull_request::{self, PrState, StoredPrState};
use crate::models::repo::{self, Repo};
use crate::models::sync_job;
use crate::models::{pr_review, user};
use crate::services::exclusion::ExclusionFilter;
use crate::services::github_client::{FileDiff, GitHubClient, PrPage, PullRequestNode};
use crate::services::transform;

/// Rolling ingestion horizon: data older than this is never ingested.
const ONE_YEAR_SECS: i64 = 365 * 24 * 60 * 60;

/// Incremental scans stop after this many consecutive already-merged PRs.
/// Heuristic: in an update-time-descending feed, recently active merged PRs
/// cluster at the head, so a long run of them means the rest is history.
const CONSECUTIVE_MERGED_STOP: u32 = 10;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Feed of pull-request data from a hosting API.
///
/// `GitHubClient` is the production implementation; tests substitute a
/// scripted source.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// Fetch one page of PRs for a repository, newest-updated first.
    async fn fetch_page(
        &self,
        owner: &str,
        name: &str,
        cursor: Option<&str>,
    ) -> Result<PrPage, AppError>;

    /// Fetch the full file-diff list for one PR.
    async fn fetch_files(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<Vec<FileDiff>, AppError>;
}

#[async_trait]
impl PullRequestSource for GitHubClient {
    async fn fetch_page(
        &self,
        owner: &str,
        name: &str,
        cursor: Option<&str>,
    ) -> Result<PrPage, AppError> {
        self.fetch_pull_requests_page(owner, name, cursor).await
    }

    async fn fetch_files(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<Vec<FileDiff>, AppError> {
        self.fetch_pr_files(owner, name, number).await
    }
}

/// Shared-handle forwarding so an `Arc`-wrapped source satisfies the trait.
/// Lets callers keep a handle to the source after passing it to an engine.
#[async_trait]
impl<T: PullRequestSource + ?Sized> PullRequestSource for Arc<T> {
    async fn fetch_page(
        &self,
        owner: &str,
        name: &str,
        cursor: Option<&str>,
    ) -> Result<PrPage, AppError> {
        (**self).fetch_page(owner, name, cursor).await
    }

    async fn fetch_files(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<Vec<FileDiff>, AppError> {
        (**self).fetch_files(owner, name, number).await
    }
}

/// Totals for one repository sync run.
#[derive(Debug, Default, Clone)]
pub struct SyncSummary {
    /// PRs actually processed (written).
    pub processed: i64,

    /// Of those, how many were first sightings.
    pub new: i64,

    /// Of those, how many were updates to known PRs.
    pub updated: i64,

    /// PRs skipped (already merged, or created before the backfill cutoff).
    pub skipped: i64,

    /// File rows fetched across all processed PRs.
    pub files_fetched: i64,
}

/// Outcome of processing a single PR.
struct PrOutcome {
    is_new: bool,
    files_processed: i64,
}

/// Sync engine, generic over the PR feed.
pub struct SyncEngine<S: PullRequestSource> {
    pool: DbPool,
    source: S,
    cancel: CancellationToken,
}

impl<S: PullRequestSource> SyncEngine<S> {
    /// Create a new sync engine.
    pub fn new(pool: DbPool, source: S) -> Self {
        Self {
            pool,
            source,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token. The engine checks it at page boundaries
    /// and fails the running job when it fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sync one repository.
    ///
    /// Creates a RUNNING job row, pages through the feed, and finalizes the
    /// job as COMPLETED (stamping `last_synced_at`) or FAILED (recording the
    /// error and re-throwing). `last_synced_at` is left untouched on
    /// failure so the next run is still treated as incremental.
    pub async fn sync_repo(&self, repo_id: i64, backfill: bool) -> Result<SyncSummary, AppError> {
        let repo = repo::get_repo(&self.pool, repo_id)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("Repo", repo_id.to_string()))?;

        // Fail fast before creating a job; a missing token is a
        // configuration error, never retried.
        config::require_github_pat(&self.pool).await?;

        let cfg = config::load_config(&self.pool).await?;
        let filter = ExclusionFilter::new(&cfg.exclude_globs);

        let cutoff = now() - ONE_YEAR_SECS;
        let is_initial = repo.last_synced_at.is_none();

        log::info!(
            "[sync] [{}] Starting sync ({}, cutoff={})",
            repo.full_name,
            if backfill {
                "backfill"
            } else if is_initial {
                "initial"
            } else {
                "incremental"
            },
            crate::services::stats::format_date(cutoff),
        );
        if !filter.is_empty() {
            log::info!(
                "[sync] [{}] Exclude globs: {}",
                repo.full_name,
                cfg.exclude_globs.join(", ")
            );
        }

        let job_id = sync_job::create_job(&self.pool, Some(repo_id), now()).await?;

        match self.run_pages(job_id, &repo, backfill, &filter, cutoff).await {
            Ok(summary) => {
                let finished = now();
                sync_job::complete_job(&self.pool, job_id, summary.processed, finished).await?;
                repo::set_last_synced_at(&self.pool, repo_id, finished).await?;
                log::info!(
                    "[sync] [{}] Sync complete: {} PRs ({} new, {} updated, {} skipped), {} files fetched",
                    repo.full_name,
                    summary.processed,
                    summary.new,
                    summary.updated,
                    summary.skipped,
                    summary.files_fetched
                );
                Ok(summary)
            }
            Err(e) => {
                log::error!("[sync] [{}] Sync FAILED: {}", repo.full_name, e);
                sync_job::fail_job(&self.pool, job_id, &e.to_string(), now()).await?;
                Err(e)
            }
        }
    }

    /// Sync every tracked repository sequentially. Each repository gets its
    /// own job row; the first failure aborts the remainder.
    pub async fn sync_all(&self, backfill: bool) -> Result<SyncSummary, AppError> {
        let repos = repo::list_repos(&self.pool).await?;
        log::info!(
            "[sync] Starting sync for {} repo(s): {}",
            repos.len(),
            repos
                .iter()
                .map(|r| r.full_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut total = SyncSummary::default();
        for repo in repos {
            let summary = self.sync_repo(repo.id, backfill).await?;
            total.processed += summary.processed;
            total.new += summary.new;
            total.updated += summary.updated;
            total.skipped += summary.skipped;
            total.files_fetched += summary.files_fetched;
        }

        log::info!("[sync] All repos synced.");
        Ok(total)
    }

    /// The page loop: consume the feed until the last page, the cutoff, or
    /// the consecutive-merged early stop.
    async fn run_pages(
        &self,
        job_id: i64,
        repo: &Repo,
        backfill: bool,
        filter: &ExclusionFilter,
        cutoff: i64,
    ) -> Result<SyncSummary, AppError> {
        let mut summary = SyncSummary::default();
        let mut cursor: Option<String> = None;
        let mut consecutive_merged = 0u32;
        let mut page_num = 0u32;
        let mut done = false;

        while !done {
            if self.cancel.is_cancelled() {
                return Err(AppError::sync("Sync cancelled"));
            }

            page_num += 1;
            let page = self
                .source
                .fetch_page(&repo.owner, &repo.name, cursor.as_deref())
                .await?;

            let newest = page.prs.first().map(|p| p.updated_at.as_str()).unwrap_or("n/a");
            let oldest = page.prs.last().map(|p| p.updated_at.as_str()).unwrap_or("n/a");
            log::info!(
                "[sync] [{}] Page {}: {} PRs (newest={}, oldest={}) hasMore={}",
                repo.full_name,
                page_num,
                page.prs.len(),
                newest,
                oldest,
                page.page_info.has_next_page
            );

            for pr in &page.prs {
                // Results are update-time descending: once one row predates
                // the cutoff, everything after it is older still.
                if let Some(updated_at) = transform::to_unix(Some(pr.updated_at.as_str())) {
                    if updated_at < cutoff {
                        log::info!(
                            "[sync] [{}] Reached cutoff at PR #{} (updated {}). Stopping.",
                            repo.full_name,
                            pr.number,
                            pr.updated_at
                        );
                        done = true;
                        break;
                    }
                }

                // Backfill revisits history but never ingests PRs created
                // before the horizon; they are skipped, not a stop signal.
                if backfill {
                    if let Some(created_at) = transform::to_unix(Some(pr.created_at.as_str())) {
                        if created_at < cutoff {
                            summary.skipped += 1;
                            continue;
                        }
                    }
                }

                let existing = {
                    let mut conn = self.pool.acquire().await?;
                    pull_request::get_stored_state(&mut conn, pr.database_id).await?
                };

                // Merged PRs are immutable for the engine's purposes.
                if existing
                    .as_ref()
                    .is_some_and(|e| PrState::from(e.state.as_str()) == PrState::Merged)
                {
                    consecutive_merged += 1;
                    summary.skipped += 1;
                    if !backfill && consecutive_merged >= CONSECUTIVE_MERGED_STOP {
                        log::info!(
                            "[sync] [{}] Hit {} consecutive already-merged PRs. Stopping early.",
                            repo.full_name,
                            consecutive_merged
                        );
                        done = true;
                        break;
                    }
                    continue;
                }
                consecutive_merged = 0;

                let outcome = self.process_pr(pr, repo, filter, existing).await?;
                summary.processed += 1;
                if outcome.is_new {
                    summary.new += 1;
                } else {
                    summary.updated += 1;
                }
                summary.files_fetched += outcome.files_processed;
            }

            sync_job::update_progress(&self.pool, job_id, summary.processed).await?;

            if done {
                break;
            }
            if !page.page_info.has_next_page {
                log::info!("[sync] [{}] Reached last page of results.", repo.full_name);
                break;
            }
            cursor = page.page_info.end_cursor.clone();
        }

        Ok(summary)
    }

    /// Process one PR: author, PR row, reviews, and (when needed) the file
    /// set with recomputed filtered stats.
    ///
    /// File diffs are fetched before the transaction opens; all writes for
    /// the PR then commit atomically.
    async fn process_pr(
        &self,
        pr: &PullRequestNode,
        repo: &Repo,
        filter: &ExclusionFilter,
        existing: Option<StoredPrState>,
    ) -> Result<PrOutcome, AppError> {
        let record = transform::transform_pr(pr)?;
        let is_new = existing.is_none();

        // Files are fetched when the PR is new or it just transitioned into
        // MERGED (it had no merged_at before and has one now). Once merged,
        // the file set is final and never re-fetched.
        let needs_file_sync = match &existing {
            None => true,
            Some(stored) => record.state == PrState::Merged && stored.merged_at.is_none(),
        };

        let file_rows: Option<Vec<NewPrFile>> = if needs_file_sync {
            let diffs = self
                .source
                .fetch_files(&repo.owner, &repo.name, pr.number)
                .await?;
            Some(
                diffs
                    .into_iter()
                    .map(|f| NewPrFile {
                        is_excluded: filter.is_excluded(&f.filename),
                        filename: f.filename,
                        status: Some(f.status),
                        additions: f.additions,
                        deletions: f.deletions,
                        patch: f.patch,
                    })
                    .collect(),
            )
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;

        let author_id = match &pr.author {
            Some(author) => Some(
                user::upsert_user(
                    &mut *tx,
                    &author.login,
                    author.database_id,
                    author.avatar_url.as_deref(),
                    now(),
                )
                .await?,
            ),
            None => None,
        };

        let pr_id = pull_request::upsert_pull_request(&mut *tx, &record, repo.id, author_id).await?;

        let mut new_reviews = 0;
        for review in &pr.reviews.nodes {
            let reviewer_id = match &review.author {
                Some(reviewer) => Some(
                    user::upsert_user(
                        &mut *tx,
                        &reviewer.login,
                        reviewer.database_id,
                        reviewer.avatar_url.as_deref(),
                        now(),
                    )
                    .await?,
                ),
                None => None,
            };

            let rec = transform::transform_review(review);
            let inserted = pr_review::insert_review_if_new(
                &mut *tx,
                pr_id,
                reviewer_id,
                &rec.state,
                rec.submitted_at,
                rec.github_id,
            )
            .await?;
            if inserted {
                new_reviews += 1;
            }
        }

        let mut files_processed = 0;
        if let Some(rows) = &file_rows {
            pr_file::delete_files_for_pr(&mut *tx, pr_id).await?;
            pr_file::insert_files(&mut *tx, pr_id, rows).await?;

            let excluded = rows.iter().filter(|f| f.is_excluded).count();
            if excluded > 0 {
                log::info!(
                    "[sync] [{}]   PR #{}: {} files fetched, {} excluded by globs",
                    repo.full_name,
                    pr.number,
                    rows.len(),
                    excluded
                );
            }

            let (filtered_additions, filtered_deletions) = transform::compute_filtered_stats(rows);
            pull_request::set_filtered_stats(&mut *tx, pr_id, filtered_additions, filtered_deletions)
                .await?;
            files_processed = rows.len() as i64;
        }

        tx.commit().await?;

        log::info!(
            "[sync] [{}]   PR #{} [{}] by {} {} reviews={} ({} new) {} +{}/-{}",
            repo.full_name,
            pr.number,
            record.state,
            pr.author.as_ref().map(|a| a.login.as_str()).unwrap_or("unknown"),
            if is_new { "(new)" } else { "(updated)" },
            pr.reviews.nodes.len(),
            new_reviews,
            if file_rows.is_some() {
                format!("files={}", files_processed)
            } else {
                "(files skipped)".to_string()
            },
            pr.additions,
            pr.deletions,
        );

        Ok(PrOutcome {
            is_new,
            files_processed,
        })
    }
}

/// Re-tag every stored file against the current exclusion globs, then
/// rewrite every PR's filtered line counts from its files.
///
/// Runs when the exclusion configuration changes. Idempotent over current
/// rows, so racing an in-flight sync only means some rows get recomputed
/// twice.
pub async fn recompute_filtered_stats(pool: &DbPool) -> Result<(), AppError> {
    let cfg = config::load_config(pool).await?;

    if cfg.exclude_globs.is_empty() {
        pr_file::clear_all_exclusions(pool).await?;
    } else {
        let filter = ExclusionFilter::new(&cfg.exclude_globs);
        let tags = pr_file::list_all_file_tags(pool).await?;
        for tag in tags {
            let excluded = filter.is_excluded(&tag.filename);
            if excluded != tag.is_excluded {
                pr_file::set_excluded(pool, tag.id, excluded).await?;
            }
        }
    }

    let pr_ids = pull_request::list_pr_ids(pool).await?;
    let count = pr_ids.len();
    for pr_id in pr_ids {
        let mut conn = pool.acquire().await?;
        let files = pr_file::list_files_for_pr(&mut conn, pr_id).await?;
        let (additions, deletions) = files.iter().fold((0, 0), |(a, d), f| {
            if f.is_excluded {
                (a, d)
            } else {
                (a + f.additions, d + f.deletions)
            }
        });
        pull_request::set_filtered_stats(&mut conn, pr_id, additions, deletions).await?;
    }

    log::info!("[recompute] Filtered stats recomputed for {} PR(s)", count);
    Ok(())
}

/// Spawn the recompute pass as a background task. The outcome is logged;
/// the handle is returned so in-process callers can await it.
pub fn spawn_recompute(pool: DbPool) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = recompute_filtered_stats(&pool).await {
            log::error!("[recompute] Filtered stats recompute failed: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_sane() {
        // After 2020, before 2100
        let ts = now();
        assert!(ts > 1_577_836_800);
        assert!(ts < 4_102_444_800);
    }

    #[test]
    fn test_summary_default_is_zeroed() {
        let s = SyncSummary::default();
        assert_eq!(s.processed, 0);
        assert_eq!(s.skipped, 0);
        assert_eq!(s.files_fetched, 0);
    }
}
