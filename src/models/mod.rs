//! Data models for the application.
//!
//! Row types for the entities in the local SQLite database, plus their query
//! helpers. Functions that participate in the per-PR transaction take a
//! `&mut SqliteConnection`; read paths take the pool.
//!
//! All models derive Serialize for the HTTP API and FromRow for SQLx queries.

pub mod pr_file;
pub mod pr_review;
pub mod pull_request;
pub mod repo;
pub mod sync_job;
pub mod user;

// Re-exports for convenient access
pub use pr_file::{NewPrFile, PrFile};
pub use pr_review::PrReview;
pub use pull_request::{PrState, PrUpsert, PullRequest};
pub use repo::Repo;
pub use sync_job::{JobStatus, SyncJob};
pub use user::User;
