//! Per-person anomaly detection.
//!
//! Three independent detectors over per-person metrics: statistical
//! (2-sigma against the cohort), top/bottom (1.5x / 0.5x the mean), and a
//! short-term trend-decline check on weekly merge counts. AI-usage checks
//! degrade to an empty contribution when the usage table is missing or
//! sparse; everything else propagates errors.

use serde::Serialize;
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::services::stats::{format_date, mean, monday_week, rolling_average, round1, stddev, WEEK_SECS};

/// Standard-deviation multiple for the statistical detector.
const STAT_SIGMA: f64 = 2.0;

/// Minimum cohort size for the top/bottom detector.
const TOP_BOTTOM_MIN_COHORT: usize = 5;

/// How many top/bottom performers to consider.
const TOP_BOTTOM_N: usize = 3;

/// Per-person qualification floors, per metric.
const MIN_PRS_MERGED: i64 = 3;
const MIN_REVIEWS_GIVEN: i64 = 3;
const MIN_LINES_WRITTEN: i64 = 10;

/// Minimum usage rows before the AI checks run at all.
const MIN_AI_COHORT: usize = 3;

/// Minimum decided suggestions before an accept rate is meaningful.
const MIN_AI_DECISIONS: i64 = 10;

/// Trend decline fires when the rolling average is at least this high...
const TREND_MIN_BASELINE: f64 = 3.0;

/// ...and the current week drops below this fraction of it.
const TREND_DROP_RATIO: f64 = 0.4;

/// Bot and service logins excluded from every cohort.
const SERVICE_LOGINS: &[&str] = &[
    "github-actions",
    "dependabot",
    "renovate",
    "coderabbitai",
    "graphite-app",
    "copilot",
    "codecov",
    "sonarqubecloud",
];

/// Classify a login as a bot/service account.
pub fn is_service_account(login: &str) -> bool {
    SERVICE_LOGINS.contains(&login) || login.ends_with("[bot]") || login.ends_with("-bot")
}

/// Which detector produced an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierKind {
    Statistical,
    Top,
    Bottom,
    TrendDecline,
}

/// How concerning an outlier is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A flagged person/metric pair.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Outlier {
    pub login: String,
    pub avatar_url: Option<String>,
    pub metric: String,
    pub value: f64,
    pub team_mean: f64,
    #[serde(rename = "type")]
    pub kind: OutlierKind,
    pub severity: Severity,
}

/// One person's value for a metric.
#[derive(Debug, Clone)]
struct PersonMetric {
    login: String,
    avatar_url: Option<String>,
    value: f64,
}

#[derive(Debug, FromRow)]
struct MetricRow {
    login: String,
    avatar_url: Option<String>,
    value: i64,
}

/// Flag anyone deviating more than `STAT_SIGMA` standard deviations from
/// the cohort mean. Skipped entirely when the deviation is zero.
fn detect_statistical(data: &[PersonMetric], metric: &str) -> Vec<Outlier> {
    let values: Vec<f64> = data.iter().map(|d| d.value).collect();
    let m = mean(&values);
    let sd = stddev(&values);
    if sd == 0.0 {
        return Vec::new();
    }

    data.iter()
        .filter(|d| (d.value - m).abs() > STAT_SIGMA * sd)
        .map(|d| Outlier {
            login: d.login.clone(),
            avatar_url: d.avatar_url.clone(),
            metric: metric.to_string(),
            value: d.value,
            team_mean: round1(m),
            kind: OutlierKind::Statistical,
            severity: if d.value < m {
                Severity::Warning
            } else {
                Severity::Info
            },
        })
        .collect()
}

/// Flag up to `TOP_BOTTOM_N` performers far above (1.5x mean) or below
/// (0.5x mean) the cohort. Needs at least `TOP_BOTTOM_MIN_COHORT` people.
fn detect_top_bottom(data: &[PersonMetric], metric: &str) -> Vec<Outlier> {
    if data.len() < TOP_BOTTOM_MIN_COHORT {
        return Vec::new();
    }

    let mut sorted: Vec<&PersonMetric> = data.iter().collect();
    sorted.sort_by(|a, b| b.value.total_cmp(&a.value));
    let m = mean(&data.iter().map(|d| d.value).collect::<Vec<_>>());

    let mut outliers = Vec::new();

    for d in sorted.iter().take(TOP_BOTTOM_N) {
        if d.value > m * 1.5 {
            outliers.push(Outlier {
                login: d.login.clone(),
                avatar_url: d.avatar_url.clone(),
                metric: metric.to_string(),
                value: d.value,
                team_mean: round1(m),
                kind: OutlierKind::Top,
                severity: Severity::Info,
            });
        }
    }

    for d in sorted.iter().rev().take(TOP_BOTTOM_N) {
        if d.value < m * 0.5 {
            outliers.push(Outlier {
                login: d.login.clone(),
                avatar_url: d.avatar_url.clone(),
                metric: metric.to_string(),
                value: d.value,
                team_mean: round1(m),
                kind: OutlierKind::Bottom,
                severity: Severity::Warning,
            });
        }
    }

    outliers
}

fn qualify(rows: Vec<MetricRow>, min_value: i64) -> Vec<PersonMetric> {
    rows.into_iter()
        .filter(|r| r.value >= min_value && !is_service_account(&r.login))
        .map(|r| PersonMetric {
            login: r.login,
            avatar_url: r.avatar_url,
            value: r.value as f64,
        })
        .collect()
}

/// Detect outliers over `[start_date, end_date]` across the PR, review,
/// LOC, and AI-usage metrics. Duplicate (login, metric) pairs are dropped,
/// first occurrence wins.
pub async fn outliers(
    pool: &DbPool,
    start_date: i64,
    end_date: i64,
) -> Result<Vec<Outlier>, AppError> {
    let mut found: Vec<Outlier> = Vec::new();

    let prs_merged: Vec<MetricRow> = sqlx::query_as(
        "SELECT u.github_login AS login, u.avatar_url, COUNT(*) AS value
         FROM pull_requests p
         JOIN users u ON p.author_id = u.id
         WHERE p.state = 'MERGED' AND p.merged_at >= ? AND p.merged_at <= ?
         GROUP BY u.github_login, u.avatar_url",
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    let pr_cohort = qualify(
        prs_merged
            .iter()
            .map(|r| MetricRow {
                login: r.login.clone(),
                avatar_url: r.avatar_url.clone(),
                value: r.value,
            })
            .collect(),
        MIN_PRS_MERGED,
    );
    found.extend(detect_top_bottom(&pr_cohort, "PRs Merged"));
    found.extend(detect_statistical(&pr_cohort, "PRs Merged"));

    let reviews: Vec<MetricRow> = sqlx::query_as(
        "SELECT u.github_login AS login, u.avatar_url, COUNT(*) AS value
         FROM pr_reviews r
         JOIN users u ON r.reviewer_id = u.id
         WHERE r.submitted_at IS NOT NULL AND r.submitted_at >= ? AND r.submitted_at <= ?
         GROUP BY u.github_login, u.avatar_url",
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    let review_cohort = qualify(reviews, MIN_REVIEWS_GIVEN);
    found.extend(detect_top_bottom(&review_cohort, "Reviews Given"));
    found.extend(detect_statistical(&review_cohort, "Reviews Given"));

    // Filtered counts are the canonical size metric; raw additions would
    // reward lockfile churn.
    let lines: Vec<MetricRow> = sqlx::query_as(
        "SELECT u.github_login AS login, u.avatar_url,
                SUM(p.filtered_additions) + SUM(p.filtered_deletions) AS value
         FROM pull_requests p
         JOIN users u ON p.author_id = u.id
         WHERE p.state = 'MERGED' AND p.merged_at >= ? AND p.merged_at <= ?
         GROUP BY u.github_login, u.avatar_url",
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    let loc_cohort = qualify(lines, MIN_LINES_WRITTEN);
    found.extend(detect_top_bottom(&loc_cohort, "Lines Written"));
    found.extend(detect_statistical(&loc_cohort, "Lines Written"));

    // AI usage may be absent entirely; that is tolerated, not an error.
    match ai_outliers(pool, start_date, end_date, &prs_merged).await {
        Ok(ai) => found.extend(ai),
        Err(e) => {
            log::debug!("AI usage checks skipped: {}", e);
        }
    }

    // First occurrence wins across detectors.
    let mut seen: HashSet<(String, String)> = HashSet::new();
    found.retain(|o| seen.insert((o.login.clone(), o.metric.clone())));

    Ok(found)
}

#[derive(Debug, FromRow)]
struct AiUsageRow {
    login: String,
    avatar_url: Option<String>,
    sessions: i64,
    accepted: i64,
    rejected: i64,
}

/// AI-usage checks: low adoption (contributors with zero sessions) and low
/// accept rate. Returns an empty set when fewer than `MIN_AI_COHORT` people
/// have usage rows in the range.
async fn ai_outliers(
    pool: &DbPool,
    start_date: i64,
    end_date: i64,
    prs_merged: &[MetricRow],
) -> Result<Vec<Outlier>, AppError> {
    let start_str = format_date(start_date);
    let end_str = format_date(end_date);

    let usage: Vec<AiUsageRow> = sqlx::query_as(
        "SELECT u.github_login AS login, u.avatar_url,
                SUM(a.num_sessions) AS sessions,
                SUM(a.suggestions_accepted) AS accepted,
                SUM(a.suggestions_rejected) AS rejected
         FROM ai_usage a
         JOIN users u ON a.user_id = u.id
         WHERE a.date >= ? AND a.date <= ?
         GROUP BY u.github_login, u.avatar_url",
    )
    .bind(&start_str)
    .bind(&end_str)
    .fetch_all(pool)
    .await?;

    if usage.len() < MIN_AI_COHORT {
        return Ok(Vec::new());
    }

    let mut outliers = Vec::new();

    let session_values: Vec<f64> = usage
        .iter()
        .filter(|r| !is_service_account(&r.login))
        .map(|r| r.sessions as f64)
        .collect();
    let team_mean_sessions = mean(&session_values);

    // Contributors who merged PRs in the range but have no usage rows at
    // all are the low-adoption signal.
    let ai_logins: HashSet<&str> = usage.iter().map(|r| r.login.as_str()).collect();
    for contributor in prs_merged {
        if is_service_account(&contributor.login) || ai_logins.contains(contributor.login.as_str())
        {
            continue;
        }
        outliers.push(Outlier {
            login: contributor.login.clone(),
            avatar_url: contributor.avatar_url.clone(),
            metric: "AI Sessions (low adoption)".to_string(),
            value: 0.0,
            team_mean: round1(team_mean_sessions),
            kind: OutlierKind::Bottom,
            severity: Severity::Warning,
        });
    }

    for r in &usage {
        if is_service_account(&r.login) {
            continue;
        }
        let total = r.accepted + r.rejected;
        if total < MIN_AI_DECISIONS {
            continue;
        }
        let rate = (r.accepted as f64 / total as f64 * 100.0).round();
        if rate < 50.0 {
            outliers.push(Outlier {
                login: r.login.clone(),
                avatar_url: r.avatar_url.clone(),
                metric: "AI Accept Rate (low)".to_string(),
                value: rate,
                team_mean: 50.0,
                kind: OutlierKind::Bottom,
                severity: Severity::Warning,
            });
        }
    }

    Ok(outliers)
}

#[derive(Debug, FromRow)]
struct WeeklyCountRow {
    login: String,
    avatar_url: Option<String>,
    week: i64,
    value: i64,
}

/// Detect short-term merge-rate declines: people whose most recent week
/// fell below `TREND_DROP_RATIO` of a rolling average that was at least
/// `TREND_MIN_BASELINE`.
pub async fn trend_outliers(pool: &DbPool, end_date: i64) -> Result<Vec<Outlier>, AppError> {
    let last_week_start = end_date - WEEK_SECS;
    let rolling_start = end_date - 4 * WEEK_SECS - WEEK_SECS;

    let rows: Vec<WeeklyCountRow> = sqlx::query_as(
        "SELECT u.github_login AS login, u.avatar_url,
                ((p.merged_at + 259200) - ((p.merged_at + 259200) % 604800)) - 259200 AS week,
                COUNT(*) AS value
         FROM pull_requests p
         JOIN users u ON p.author_id = u.id
         WHERE p.state = 'MERGED' AND p.merged_at >= ? AND p.merged_at <= ?
         GROUP BY u.github_login, u.avatar_url, week",
    )
    .bind(rolling_start)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    struct PersonWeeks {
        avatar_url: Option<String>,
        weeks: HashMap<i64, i64>,
    }

    let mut by_person: HashMap<String, PersonWeeks> = HashMap::new();
    for row in rows {
        if is_service_account(&row.login) {
            continue;
        }
        by_person
            .entry(row.login)
            .or_insert_with(|| PersonWeeks {
                avatar_url: row.avatar_url,
                weeks: HashMap::new(),
            })
            .weeks
            .insert(row.week, row.value);
    }

    let current_week = monday_week(last_week_start);
    let mut outliers = Vec::new();

    for (login, person) in by_person {
        let current_value = person.weeks.get(&current_week).copied().unwrap_or(0) as f64;

        let mut prior: Vec<(i64, i64)> = person
            .weeks
            .iter()
            .filter(|(w, _)| **w < current_week)
            .map(|(w, v)| (*w, *v))
            .collect();
        if prior.len() < 3 {
            continue;
        }
        prior.sort_by_key(|(w, _)| *w);
        let prior_values: Vec<f64> = prior.iter().map(|(_, v)| *v as f64).collect();

        let rolling = rolling_average(&prior_values, 4);
        if rolling >= TREND_MIN_BASELINE && current_value < rolling * TREND_DROP_RATIO {
            outliers.push(Outlier {
                login,
                avatar_url: person.avatar_url,
                metric: "PRs Merged (trend decline)".to_string(),
                value: current_value,
                team_mean: round1(rolling),
                kind: OutlierKind::TrendDecline,
                severity: Severity::Warning,
            });
        }
    }

    outliers.sort_by(|a, b| a.login.cmp(&b.login));
    Ok(outliers)
}
