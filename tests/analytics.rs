//! Analytics integration tests.
//!
//! Seeds a throwaway database directly (the ingestion path has its own
//! suite) and exercises the filtered-stats recompute, the outlier
//! detectors, and trend-decline detection end to end.

use tempfile::tempdir;

use devtempo::config;
use devtempo::db;
use devtempo::db::pool::DbPool;
use devtempo::models::pr_file::{insert_files, NewPrFile};
use devtempo::models::pull_request::{upsert_pull_request, PrState, PrUpsert};
use devtempo::models::user::upsert_user;
use devtempo::services::outliers::{self, OutlierKind, Severity};
use devtempo::services::stats::monday_week;
use devtempo::services::sync_engine::recompute_filtered_stats;

const DAY: i64 = 86_400;
const WEEK: i64 = 7 * DAY;

async fn setup() -> (DbPool, i64, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
    let repo = devtempo::models::repo::insert_repo(&pool, "acme", "widgets", 0)
        .await
        .unwrap();
    (pool, repo.id, dir)
}

async fn seed_user(pool: &DbPool, login: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    upsert_user(&mut conn, login, None, None, 0).await.unwrap()
}

async fn seed_merged_pr(
    pool: &DbPool,
    repo_id: i64,
    github_id: i64,
    author_id: i64,
    merged_at: i64,
    filtered_additions: i64,
) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    let pr_id = upsert_pull_request(
        &mut conn,
        &PrUpsert {
            github_id,
            number: github_id,
            title: format!("PR {}", github_id),
            state: PrState::Merged,
            is_draft: false,
            created_at: merged_at - DAY,
            published_at: Some(merged_at - DAY),
            merged_at: Some(merged_at),
            closed_at: Some(merged_at),
            additions: filtered_additions,
            deletions: 0,
            changed_files: 1,
            url: String::new(),
        },
        repo_id,
        Some(author_id),
    )
    .await
    .unwrap();
    devtempo::models::pull_request::set_filtered_stats(&mut conn, pr_id, filtered_additions, 0)
        .await
        .unwrap();
    pr_id
}

// ── Filtered-stats recompute ─────────────────────────────────────────────────

#[tokio::test]
async fn recompute_retags_files_and_sums() {
    let (pool, repo_id, _dir) = setup().await;
    let author = seed_user(&pool, "alice").await;
    let pr_id = seed_merged_pr(&pool, repo_id, 1, author, 1_700_000_000, 0).await;

    {
        let mut conn = pool.acquire().await.unwrap();
        insert_files(
            &mut conn,
            pr_id,
            &[
                NewPrFile {
                    filename: "src/lib.rs".into(),
                    status: None,
                    additions: 10,
                    deletions: 2,
                    is_excluded: false,
                    patch: None,
                },
                NewPrFile {
                    filename: "Cargo.lock".into(),
                    status: None,
                    additions: 300,
                    deletions: 100,
                    is_excluded: false,
                    patch: None,
                },
            ],
        )
        .await
        .unwrap();
    }

    // No globs yet: everything counts.
    recompute_filtered_stats(&pool).await.unwrap();
    let (fa, fd): (i64, i64) = sqlx::query_as(
        "SELECT filtered_additions, filtered_deletions FROM pull_requests WHERE id = ?",
    )
    .bind(pr_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((fa, fd), (310, 102));

    // Exclude lockfiles and recompute: the invariant must hold again.
    config::set_setting(&pool, config::KEY_EXCLUDE_GLOBS, r#"["*.lock"]"#)
        .await
        .unwrap();
    recompute_filtered_stats(&pool).await.unwrap();

    let (fa, fd): (i64, i64) = sqlx::query_as(
        "SELECT filtered_additions, filtered_deletions FROM pull_requests WHERE id = ?",
    )
    .bind(pr_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((fa, fd), (10, 2));

    let (excluded,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pr_files WHERE is_excluded = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(excluded, 1);

    // Clearing the glob list resets every exclusion flag and the sums.
    config::set_setting(&pool, config::KEY_EXCLUDE_GLOBS, "[]").await.unwrap();
    recompute_filtered_stats(&pool).await.unwrap();

    let (excluded,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pr_files WHERE is_excluded = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(excluded, 0);

    let (fa, _fd): (i64, i64) = sqlx::query_as(
        "SELECT filtered_additions, filtered_deletions FROM pull_requests WHERE id = ?",
    )
    .bind(pr_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(fa, 310);
}

// ── Outlier detection over the store ─────────────────────────────────────────

#[tokio::test]
async fn outlier_cohort_is_deterministic() {
    let (pool, repo_id, _dir) = setup().await;
    let base = 1_700_000_000;
    let mut github_id = 0;

    // Six people merging [10,10,10,10,10,200] PRs inside the window: 200 is
    // unambiguously beyond 2 sigma and beyond 1.5x the mean.
    for (login, count) in [
        ("dev-a", 10),
        ("dev-b", 10),
        ("dev-c", 10),
        ("dev-d", 10),
        ("dev-e", 10),
        ("machine", 200),
    ] {
        let author = seed_user(&pool, login).await;
        for _ in 0..count {
            github_id += 1;
            seed_merged_pr(&pool, repo_id, github_id, author, base + github_id, 0).await;
        }
    }

    let found = outliers::outliers(&pool, base, base + DAY).await.unwrap();

    // Dedup keeps the first detector's verdict: top/bottom runs before the
    // statistical pass, so the heavy hitter reports as a top outlier.
    let machine: Vec<_> = found
        .iter()
        .filter(|o| o.login == "machine" && o.metric == "PRs Merged")
        .collect();
    assert_eq!(machine.len(), 1);
    assert_eq!(machine[0].kind, OutlierKind::Top);
    assert_eq!(machine[0].severity, Severity::Info);
    assert_eq!(machine[0].value, 200.0);

    // The five at 10 sit below 0.5x of the ~41.7 mean: bottom warnings,
    // capped at three.
    let bottoms: Vec<_> = found
        .iter()
        .filter(|o| o.metric == "PRs Merged" && o.kind == OutlierKind::Bottom)
        .collect();
    assert_eq!(bottoms.len(), 3);
    assert!(bottoms.iter().all(|o| o.severity == Severity::Warning));
}

#[tokio::test]
async fn service_accounts_are_excluded_from_cohorts() {
    let (pool, repo_id, _dir) = setup().await;
    let base = 1_700_000_000;
    let mut github_id = 0;

    for (login, count) in [
        ("dev-a", 10),
        ("dev-b", 10),
        ("dev-c", 10),
        ("dev-d", 10),
        ("dev-e", 10),
        ("dependabot", 500),
    ] {
        let author = seed_user(&pool, login).await;
        for _ in 0..count {
            github_id += 1;
            seed_merged_pr(&pool, repo_id, github_id, author, base + github_id, 0).await;
        }
    }

    let found = outliers::outliers(&pool, base, base + DAY).await.unwrap();
    assert!(found.iter().all(|o| o.login != "dependabot"));
    // With the bot gone the cohort is flat: nothing to flag.
    assert!(!found.iter().any(|o| o.metric == "PRs Merged"));
}

#[tokio::test]
async fn small_cohort_stays_quiet() {
    let (pool, repo_id, _dir) = setup().await;
    let base = 1_700_000_000;
    let mut github_id = 0;

    // Four qualifying people: below the top/bottom floor of five, and no
    // 2-sigma deviant.
    for (login, count) in [("a", 4), ("b", 5), ("c", 6), ("d", 5)] {
        let author = seed_user(&pool, login).await;
        for _ in 0..count {
            github_id += 1;
            seed_merged_pr(&pool, repo_id, github_id, author, base + github_id, 0).await;
        }
    }

    let found = outliers::outliers(&pool, base, base + DAY).await.unwrap();
    assert!(found.iter().all(|o| o.metric != "PRs Merged"));
}

#[tokio::test]
async fn missing_ai_usage_degrades_silently() {
    let (pool, repo_id, _dir) = setup().await;
    let base = 1_700_000_000;
    let author = seed_user(&pool, "alice").await;
    for i in 1..=5 {
        seed_merged_pr(&pool, repo_id, i, author, base + i, 0).await;
    }

    // No ai_usage rows at all: the AI checks contribute nothing and the
    // call still succeeds.
    let found = outliers::outliers(&pool, base, base + DAY).await.unwrap();
    assert!(found.iter().all(|o| !o.metric.starts_with("AI ")));
}

#[tokio::test]
async fn ai_low_adoption_and_accept_rate_flagged() {
    let (pool, repo_id, _dir) = setup().await;
    let base = 1_700_000_000;
    let date = devtempo::services::stats::format_date(base);
    let mut github_id = 0;

    // Four contributors merge PRs; three of them have usage rows.
    let mut user_ids = Vec::new();
    for login in ["ada", "ben", "cyd", "dee"] {
        let id = seed_user(&pool, login).await;
        for _ in 0..3 {
            github_id += 1;
            seed_merged_pr(&pool, repo_id, github_id, id, base + github_id, 0).await;
        }
        user_ids.push(id);
    }

    // ada/ben accept nearly everything; cyd rejects most suggestions.
    for (idx, (sessions, accepted, rejected)) in
        [(30i64, 90i64, 5i64), (25, 80, 10), (20, 4, 16)].into_iter().enumerate()
    {
        sqlx::query(
            "INSERT INTO ai_usage (user_id, date, num_sessions, suggestions_accepted, suggestions_rejected)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_ids[idx])
        .bind(&date)
        .bind(sessions)
        .bind(accepted)
        .bind(rejected)
        .execute(&pool)
        .await
        .unwrap();
    }

    let found = outliers::outliers(&pool, base, base + DAY).await.unwrap();

    let low_adoption: Vec<_> = found
        .iter()
        .filter(|o| o.metric == "AI Sessions (low adoption)")
        .collect();
    assert_eq!(low_adoption.len(), 1);
    assert_eq!(low_adoption[0].login, "dee");
    assert_eq!(low_adoption[0].value, 0.0);
    assert_eq!(low_adoption[0].severity, Severity::Warning);

    let low_accept: Vec<_> = found
        .iter()
        .filter(|o| o.metric == "AI Accept Rate (low)")
        .collect();
    assert_eq!(low_accept.len(), 1);
    assert_eq!(low_accept[0].login, "cyd");
    assert_eq!(low_accept[0].value, 20.0);
}

// ── Trend decline ────────────────────────────────────────────────────────────

#[tokio::test]
async fn trend_decline_fires_on_sharp_drop() {
    let (pool, repo_id, _dir) = setup().await;

    // Anchor on a Monday boundary so weekly buckets are stable.
    let end = monday_week(1_700_000_000);
    let current_week = end - WEEK;
    let mut github_id = 0;

    let steady = seed_user(&pool, "steady").await;
    let slumped = seed_user(&pool, "slumped").await;

    // Both merged 5 PRs in each of the 4 prior weeks.
    for week_back in 2..=5 {
        let week_start = end - week_back * WEEK;
        for _ in 0..5 {
            for &author in &[steady, slumped] {
                github_id += 1;
                seed_merged_pr(&pool, repo_id, github_id, author, week_start + github_id, 0).await;
            }
        }
    }

    // Most recent week: steady keeps the pace, slumped drops to 1 (< 40%
    // of the rolling 5).
    for _ in 0..5 {
        github_id += 1;
        seed_merged_pr(&pool, repo_id, github_id, steady, current_week + github_id, 0).await;
    }
    github_id += 1;
    seed_merged_pr(&pool, repo_id, github_id, slumped, current_week + github_id, 0).await;

    let found = outliers::trend_outliers(&pool, end).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].login, "slumped");
    assert_eq!(found[0].kind, OutlierKind::TrendDecline);
    assert_eq!(found[0].severity, Severity::Warning);
    assert_eq!(found[0].value, 1.0);
    assert_eq!(found[0].team_mean, 5.0);
}

#[tokio::test]
async fn trend_needs_three_prior_weeks() {
    let (pool, repo_id, _dir) = setup().await;

    let end = monday_week(1_700_000_000);
    let current_week = end - WEEK;
    let mut github_id = 0;

    let newcomer = seed_user(&pool, "newcomer").await;

    // Only two prior weeks of history: never flagged, whatever the drop.
    for week_back in 2..=3 {
        let week_start = end - week_back * WEEK;
        for _ in 0..5 {
            github_id += 1;
            seed_merged_pr(&pool, repo_id, github_id, newcomer, week_start + github_id, 0).await;
        }
    }
    github_id += 1;
    seed_merged_pr(&pool, repo_id, github_id, newcomer, current_week + github_id, 0).await;

    let found = outliers::trend_outliers(&pool, end).await.unwrap();
    assert!(found.is_empty());
}
