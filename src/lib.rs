//! devtempo: pull-request ingestion and team productivity analytics.
//!
//! Pulls pull-request/review/file data from the GitHub API into a local
//! SQLite store, then derives analytics from it: exclusion-filtered line
//! statistics, code-churn rates, and per-person outlier detection. A small
//! axum server exposes the operational surface.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod server;
pub mod services;
