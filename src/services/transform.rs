//! Wire-format to row-shape mapping.
//!
//! Pure functions, no I/O. All API timestamps arrive as ISO 8601 strings and
//! are converted to integer Unix seconds; a missing or unparseable optional
//! timestamp maps to `None`, never to zero.

use crate::error::AppError;
use crate::models::pr_file::NewPrFile;
use crate::models::pull_request::{PrState, PrUpsert};
use crate::services::github_client::{PullRequestNode, ReviewNode};

/// Convert an optional ISO 8601 timestamp to Unix seconds.
pub fn to_unix(iso: Option<&str>) -> Option<i64> {
    let iso = iso?;
    chrono::DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Derive the publish time of a PR: the first "ready for review" event if
/// one exists, else the creation time for a non-draft, else `None` (a PR
/// still in draft has no publish time).
pub fn published_at(pr: &PullRequestNode) -> Option<i64> {
    if let Some(event) = pr.timeline_items.nodes.first() {
        if let Some(ts) = to_unix(event.created_at.as_deref()) {
            return Some(ts);
        }
    }
    if !pr.is_draft {
        return to_unix(Some(pr.created_at.as_str()));
    }
    None
}

/// Map a wire PR node to its row shape.
///
/// Fails only when the required creation timestamp is unparseable, which
/// indicates a malformed payload rather than missing data.
pub fn transform_pr(pr: &PullRequestNode) -> Result<PrUpsert, AppError> {
    let created_at = to_unix(Some(pr.created_at.as_str())).ok_or_else(|| {
        AppError::invalid_input_field(
            format!("PR #{} has unparseable createdAt {:?}", pr.number, pr.created_at),
            "createdAt",
        )
    })?;

    Ok(PrUpsert {
        github_id: pr.database_id,
        number: pr.number,
        title: pr.title.clone(),
        state: PrState::from(pr.state.as_str()),
        is_draft: pr.is_draft,
        created_at,
        published_at: published_at(pr),
        merged_at: to_unix(pr.merged_at.as_deref()),
        closed_at: to_unix(pr.closed_at.as_deref()),
        additions: pr.additions,
        deletions: pr.deletions,
        changed_files: pr.changed_files,
        url: pr.url.clone(),
    })
}

/// Row shape of a review extracted from a PR node.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub github_id: Option<i64>,
    pub state: String,
    pub submitted_at: Option<i64>,
}

/// Map a wire review node to its row shape.
pub fn transform_review(review: &ReviewNode) -> ReviewRecord {
    ReviewRecord {
        github_id: review.database_id,
        state: review.state.clone(),
        submitted_at: to_unix(review.submitted_at.as_deref()),
    }
}

/// Sum additions/deletions over non-excluded files.
pub fn compute_filtered_stats(files: &[NewPrFile]) -> (i64, i64) {
    let mut filtered_additions = 0;
    let mut filtered_deletions = 0;
    for f in files {
        if !f.is_excluded {
            filtered_additions += f.additions;
            filtered_deletions += f.deletions;
        }
    }
    (filtered_additions, filtered_deletions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::github_client::{TimelineEvent, TimelineItems};

    fn sample_node() -> PullRequestNode {
        serde_json::from_str(
            r#"{
                "databaseId": 1,
                "number": 10,
                "title": "t",
                "state": "OPEN",
                "isDraft": false,
                "createdAt": "2026-02-01T00:00:00Z",
                "updatedAt": "2026-02-02T00:00:00Z",
                "mergedAt": null,
                "closedAt": null,
                "additions": 5,
                "deletions": 3,
                "changedFiles": 2,
                "url": "https://example/pr/10",
                "author": null,
                "timelineItems": {"nodes": []},
                "reviews": {"nodes": []}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_to_unix() {
        assert_eq!(to_unix(Some("1970-01-01T00:01:00Z")), Some(60));
        assert_eq!(to_unix(Some("2024-01-15T10:30:00+00:00")), to_unix(Some("2024-01-15T10:30:00Z")));
        // Missing and malformed both map to None, never zero
        assert_eq!(to_unix(None), None);
        assert_eq!(to_unix(Some("not-a-date")), None);
    }

    #[test]
    fn test_published_at_prefers_ready_event() {
        let mut pr = sample_node();
        pr.is_draft = true;
        pr.timeline_items = TimelineItems {
            nodes: vec![TimelineEvent {
                created_at: Some("2026-02-03T00:00:00Z".to_string()),
            }],
        };
        assert_eq!(published_at(&pr), to_unix(Some("2026-02-03T00:00:00Z")));
    }

    #[test]
    fn test_published_at_falls_back_to_created_for_non_draft() {
        let pr = sample_node();
        assert_eq!(published_at(&pr), to_unix(Some("2026-02-01T00:00:00Z")));
    }

    #[test]
    fn test_published_at_none_for_draft_without_event() {
        let mut pr = sample_node();
        pr.is_draft = true;
        assert_eq!(published_at(&pr), None);
    }

    #[test]
    fn test_transform_pr_rejects_bad_created_at() {
        let mut pr = sample_node();
        pr.created_at = "garbage".to_string();
        assert!(transform_pr(&pr).is_err());
    }

    #[test]
    fn test_transform_pr_maps_fields() {
        let mut pr = sample_node();
        pr.state = "MERGED".to_string();
        pr.merged_at = Some("2026-02-05T00:00:00Z".to_string());

        let record = transform_pr(&pr).unwrap();
        assert_eq!(record.state, PrState::Merged);
        assert_eq!(record.merged_at, to_unix(Some("2026-02-05T00:00:00Z")));
        assert_eq!(record.additions, 5);
        assert_eq!(record.changed_files, 2);
    }

    #[test]
    fn test_compute_filtered_stats_skips_excluded() {
        let files = vec![
            NewPrFile {
                filename: "src/lib.rs".into(),
                status: None,
                additions: 10,
                deletions: 4,
                is_excluded: false,
                patch: None,
            },
            NewPrFile {
                filename: "Cargo.lock".into(),
                status: None,
                additions: 500,
                deletions: 200,
                is_excluded: true,
                patch: None,
            },
        ];

        assert_eq!(compute_filtered_stats(&files), (10, 4));
        assert_eq!(compute_filtered_stats(&[]), (0, 0));
    }
}
