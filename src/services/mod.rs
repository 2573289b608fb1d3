//! Business logic services.
//!
//! The ingestion pipeline (API client, transform, sync engine) and the
//! derived-analytics engines (exclusion filter, churn, outliers) live here,
//! independent of the HTTP layer.

pub mod churn;
pub mod exclusion;
pub mod github_client;
pub mod outliers;
pub mod stats;
pub mod sync_engine;
pub mod sync_lock;
pub mod transform;

pub use exclusion::ExclusionFilter;
pub use github_client::{GitHubClient, GitHubClientConfig};
pub use sync_engine::{PullRequestSource, SyncEngine};
pub use sync_lock::{SyncLock, SyncScope};
