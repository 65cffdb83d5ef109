//! The `GitHubApi` trait and the wire types it deals in.
//!
//! This is the seam between the audit engine and the network: the production
//! implementation lives in [`crate::github::client`], tests substitute mocks.
//! The trait models exactly the operations compliance auditing needs —
//! nothing here mutates a remote repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::GitHubError;

// ── Wire types ───────────────────────────────────────────────────────────────

/// The authenticated user, as returned by `GET /user/{login}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    pub login: String,
}

/// One quota bucket of the rate-limit response (`remaining` out of `limit`).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Quota {
    pub remaining: u64,
    pub limit: u64,
}

impl Quota {
    /// Fraction of the quota still available, 0.0 when the limit is zero.
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.remaining as f64 / self.limit as f64
        }
    }
}

/// Core + search quotas from `GET /rate_limit`.
///
/// Search requests are far more quota-expensive than content reads, so the
/// effective capacity is the *minimum* of the two ratios.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimits {
    pub core: Quota,
    pub search: Quota,
}

impl RateLimits {
    pub fn remaining_ratio(&self) -> f64 {
        self.core.ratio().min(self.search.ratio())
    }
}

/// A repository as returned by the repository search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepository {
    pub id: i64,
    pub name: String,
    #[serde(rename = "owner", deserialize_with = "owner_login")]
    pub owner: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
}

fn owner_login<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Owner {
        login: String,
    }
    Ok(Owner::deserialize(deserializer)?.login)
}

/// A branch with its head commit sha.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBranch {
    pub name: String,
    #[serde(rename = "commit", deserialize_with = "commit_sha")]
    pub commit_sha: String,
}

fn commit_sha<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Commit {
        sha: String,
    }
    Ok(Commit::deserialize(deserializer)?.sha)
}

/// One hit from the code search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeSearchItem {
    /// Bare file name (e.g. `Method.sln`).
    pub name: String,
    /// Path from the repository root (no leading slash).
    pub path: String,
}

// ── Trait ────────────────────────────────────────────────────────────────────

/// The GitHub operations consumed by the auditor.
///
/// A "not found" raw-content result is a valid `None` outcome, distinguished
/// from a zero-length file — missing remote files are normal absences, not
/// errors.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Fetch a user by login. Used as the authentication probe on reconnect.
    async fn user(&self, login: &str) -> Result<RemoteUser, GitHubError>;

    /// Current core + search quotas.
    async fn rate_limits(&self) -> Result<RateLimits, GitHubError>;

    /// Search repositories belonging to `owner`, optionally restricted to
    /// those updated after `updated_after`. Archived repositories are
    /// included in the response; callers filter them.
    async fn search_repositories(
        &self,
        owner: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRepository>, GitHubError>;

    /// Search code by path + file name within one repository.
    async fn search_code(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        filename: &str,
    ) -> Result<Vec<CodeSearchItem>, GitHubError>;

    /// List branches of a repository.
    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<RemoteBranch>, GitHubError>;

    /// Fetch raw file content. `Ok(None)` means the file does not exist.
    async fn raw_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, GitHubError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_min_of_core_and_search() {
        let limits = RateLimits {
            core: Quota { remaining: 4000, limit: 5000 },
            search: Quota { remaining: 3, limit: 30 },
        };
        assert!((limits.remaining_ratio() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn zero_limit_quota_has_zero_ratio() {
        let quota = Quota { remaining: 10, limit: 0 };
        assert_eq!(quota.ratio(), 0.0);
    }

    #[test]
    fn repository_deserializes_owner_login() {
        let json = r#"{
            "id": 7,
            "name": "method",
            "owner": { "login": "acme" },
            "private": true,
            "archived": false
        }"#;
        let repo: RemoteRepository = serde_json::from_str(json).unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.id, 7);
        assert!(repo.private);
    }

    #[test]
    fn branch_deserializes_commit_sha() {
        let json = r#"{ "name": "master", "commit": { "sha": "abc123" } }"#;
        let branch: RemoteBranch = serde_json::from_str(json).unwrap();
        assert_eq!(branch.commit_sha, "abc123");
    }
}
