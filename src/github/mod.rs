//! GitHub API layer: the authenticated session, rate-limit guard, download
//! cache, and the background activity poller.
//!
//! Everything network-facing goes through the [`api::GitHubApi`] trait so
//! the crawl and validation engines can be exercised against mock servers.

pub mod activity;
pub mod api;
pub mod cache;
pub mod client;
pub mod connection;

use thiserror::Error;

/// Errors surfaced by the GitHub API layer.
///
/// Only `Unauthorized` is recoverable — callers log it and retry on a later
/// cycle. Everything else propagates to the caller of the enclosing
/// operation. Policy violations are never represented here; they are data,
/// not errors.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// The credential was rejected. Recoverable: surfaces as "not connected".
    #[error("authorization rejected: {0}")]
    Unauthorized(String),

    /// The API answered with an unexpected status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure (DNS, TLS, connection reset, body decode).
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

pub use activity::{ActivityPoller, ActivityReport, PollerState, DEFAULT_POLLING_TIME};
pub use api::{CodeSearchItem, GitHubApi, Quota, RateLimits, RemoteBranch, RemoteRepository, RemoteUser};
pub use cache::DownloadCache;
pub use client::GitHubClient;
pub use connection::{Connection, REMAINING_REQUESTS_THRESHOLD, SLOWDOWN_TIME};
