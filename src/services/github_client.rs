//! GitHub API client.
//!
//! GraphQL for the paginated pull-request feed (update-time descending),
//! REST for per-PR file listings. Transient upstream failures (429/502/503/
//! 504, or an empty GraphQL payload treated as a 502) are retried with
//! exponential backoff; anything else propagates to the caller immediately.

use crate::error::AppError;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// Default public GitHub endpoints.
const GRAPHQL_URL: &str = "https://api.github.com/graphql";
const REST_BASE_URL: &str = "https://api.github.com";

/// Retry budget beyond the first attempt.
const MAX_RETRIES: u32 = 4;

/// Backoff starts here and doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// REST page size for file listings.
const FILES_PER_PAGE: usize = 100;

/// GraphQL query for one page of pull requests, newest-updated first.
/// Includes the author, the first ready-for-review timeline event, and the
/// first 50 reviews per node.
const PULL_REQUESTS_QUERY: &str = r#"
query($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(first: 100, after: $cursor, orderBy: {field: UPDATED_AT, direction: DESC}) {
      pageInfo {
        hasNextPage
        endCursor
      }
      nodes {
        databaseId
        number
        title
        state
        isDraft
        createdAt
        updatedAt
        mergedAt
        closedAt
        additions
        deletions
        changedFiles
        url
        author {
          login
          ... on User {
            databaseId
            avatarUrl
          }
        }
        timelineItems(first: 1, itemTypes: [READY_FOR_REVIEW_EVENT]) {
          nodes {
            ... on ReadyForReviewEvent {
              createdAt
            }
          }
        }
        reviews(first: 50) {
          nodes {
            databaseId
            state
            submittedAt
            author {
              login
              ... on User {
                databaseId
                avatarUrl
              }
            }
          }
        }
      }
    }
  }
  rateLimit {
    cost
    remaining
    resetAt
  }
}
"#;

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    /// Personal access token.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// GraphQL endpoint (overridable for self-hosted instances).
    pub graphql_url: String,

    /// REST base URL.
    pub rest_base_url: String,
}

impl GitHubClientConfig {
    /// Config for the public GitHub API with a 30s timeout.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            timeout_secs: 30,
            graphql_url: GRAPHQL_URL.to_string(),
            rest_base_url: REST_BASE_URL.to_string(),
        }
    }
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
}

/// Rate limit descriptor returned with every GraphQL page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub cost: i64,
    pub remaining: i64,
    /// ISO 8601 reset time.
    pub reset_at: String,
}

/// Cursor-pagination info.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// PR author or reviewer as returned by the API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub login: String,
    pub database_id: Option<i64>,
    pub avatar_url: Option<String>,
}

/// Timeline event node (only the timestamp is requested).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineItems {
    #[serde(default)]
    pub nodes: Vec<TimelineEvent>,
}

/// A review as returned inside a PR node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNode {
    pub database_id: Option<i64>,
    pub state: String,
    pub submitted_at: Option<String>,
    pub author: Option<Actor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewConnection {
    #[serde(default)]
    pub nodes: Vec<ReviewNode>,
}

/// A pull request node from the GraphQL feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestNode {
    pub database_id: i64,
    pub number: i64,
    pub title: String,
    /// OPEN, MERGED, CLOSED.
    pub state: String,
    pub is_draft: bool,
    pub created_at: String,
    pub updated_at: String,
    pub merged_at: Option<String>,
    pub closed_at: Option<String>,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub url: String,
    pub author: Option<Actor>,
    #[serde(default)]
    pub timeline_items: TimelineItems,
    #[serde(default)]
    pub reviews: ReviewConnection,
}

/// One page of the pull-request feed.
#[derive(Debug, Clone)]
pub struct PrPage {
    pub prs: Vec<PullRequestNode>,
    pub page_info: PageInfo,
    pub rate_limit: RateLimit,
}

/// A file entry from the REST list-files endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FileDiff {
    pub filename: String,
    pub status: String,
    pub additions: i64,
    pub deletions: i64,
    pub patch: Option<String>,
}

// GraphQL response envelope

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<PullRequestsData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestsData {
    repository: Option<RepositoryData>,
    rate_limit: Option<RateLimit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryData {
    pull_requests: Option<PullRequestsConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestsConnection {
    page_info: PageInfo,
    nodes: Vec<PullRequestNode>,
}

/// Whether an upstream status is worth retrying.
fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// Run an API call with bounded exponential backoff on transient failures.
async fn with_retry<T, Fut>(label: &str, mut op: impl FnMut() -> Fut) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 0..=MAX_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.status_code().is_some_and(is_retryable);
                if !retryable || attempt == MAX_RETRIES {
                    return Err(err);
                }

                let delay = backoff.min(MAX_BACKOFF);
                log::info!(
                    "[sync] {}: {}, retrying in {}s (attempt {}/{})",
                    label,
                    err,
                    delay.as_secs(),
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    unreachable!("retry loop returns on final attempt")
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| AppError::configuration("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);
        // GitHub rejects requests without a User-Agent
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("devtempo"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Fetch one page of the pull-request feed via GraphQL.
    ///
    /// Logs a human-readable rate-limit line per page for operational
    /// visibility. A response whose repository payload is null is treated as
    /// a 502 so the retry policy applies.
    pub async fn fetch_pull_requests_page(
        &self,
        owner: &str,
        name: &str,
        cursor: Option<&str>,
    ) -> Result<PrPage, AppError> {
        let label = format!("{}/{} GraphQL", owner, name);
        let client = self.client.clone();
        let url = self.config.graphql_url.clone();
        let body = json!({
            "query": PULL_REQUESTS_QUERY,
            "variables": { "owner": owner, "name": name, "cursor": cursor },
        });
        let repo_label = format!("{}/{}", owner, name);

        let page = with_retry(&label, move || {
            let client = client.clone();
            let url = url.clone();
            let body = body.clone();
            let repo_label = repo_label.clone();
            async move {
                let response = client.post(&url).json(&body).send().await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(map_api_error(status, &body, "/graphql"));
                }

                let envelope: GraphQlEnvelope = response
                    .json()
                    .await
                    .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)))?;

                let data = envelope.data.unwrap_or(PullRequestsData {
                    repository: None,
                    rate_limit: None,
                });

                let connection = data.repository.and_then(|r| r.pull_requests);
                let Some(connection) = connection else {
                    // The API occasionally returns 200 with a null repository
                    // during incidents; retryable like a gateway failure.
                    return Err(AppError::github_api_full(
                        format!("GitHub returned empty response for {}", repo_label),
                        502,
                        "/graphql",
                    ));
                };

                let rate_limit = data.rate_limit.unwrap_or(RateLimit {
                    cost: 0,
                    remaining: 0,
                    reset_at: String::new(),
                });

                Ok(PrPage {
                    prs: connection.nodes,
                    page_info: connection.page_info,
                    rate_limit,
                })
            }
        })
        .await?;

        log::info!(
            "[sync] [{}/{}] GraphQL rate limit: cost={} remaining={} resets at {}",
            owner,
            name,
            page.rate_limit.cost,
            page.rate_limit.remaining,
            page.rate_limit.reset_at
        );

        Ok(page)
    }

    /// Fetch the full file-diff list for one PR via REST.
    ///
    /// Auto-paginates at 100 per page, continuing while a full page comes
    /// back.
    pub async fn fetch_pr_files(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<FileDiff>, AppError> {
        let endpoint = format!("/repos/{}/{}/pulls/{}/files", owner, repo, number);
        let url = format!("{}{}", self.config.rest_base_url, endpoint);
        let label = format!("{}/{}#{} files", owner, repo, number);

        let mut files = Vec::new();
        let mut page = 1u32;

        loop {
            let client = self.client.clone();
            let page_url = url.clone();
            let page_endpoint = endpoint.clone();
            let current_page = page;

            let batch: Vec<FileDiff> = with_retry(&label, move || {
                let client = client.clone();
                let url = page_url.clone();
                let endpoint = page_endpoint.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&[
                            ("per_page", FILES_PER_PAGE.to_string()),
                            ("page", current_page.to_string()),
                        ])
                        .send()
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(map_api_error(status, &body, &endpoint));
                    }

                    response
                        .json::<Vec<FileDiff>>()
                        .await
                        .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)))
                }
            })
            .await?;

            let batch_len = batch.len();
            files.extend(batch);

            if batch_len < FILES_PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(files)
    }

    /// Validate the token by fetching the authenticated user's login.
    pub async fn test_connection(&self) -> Result<String, AppError> {
        #[derive(Deserialize)]
        struct AuthenticatedUser {
            login: String,
        }

        let url = format!("{}/user", self.config.rest_base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_api_error(status, &body, "/user"));
        }

        let user: AuthenticatedUser = response
            .json()
            .await
            .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)))?;

        Ok(user.login)
    }
}

/// Map an error response to an `AppError`, extracting GitHub's message field
/// when present.
fn map_api_error(status: StatusCode, body: &str, endpoint: &str) -> AppError {
    let body_message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        });

    let message = match (status, &body_message) {
        (StatusCode::UNAUTHORIZED, _) => "Bad credentials, check the stored token".to_string(),
        (StatusCode::FORBIDDEN, _) => body_message
            .clone()
            .unwrap_or_else(|| "Access denied".to_string()),
        (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
        (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
        (_, Some(msg)) => msg.clone(),
        _ => format!("Request failed ({})", status.as_u16()),
    };

    AppError::github_api_full(message, status.as_u16(), endpoint)
}
