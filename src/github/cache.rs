//! Raw-content download cache.
//!
//! Content is memoized per (repository address, normalized path) until an
//! explicit [`DownloadCache::clear`], which the validation engine invokes
//! when activity is detected — re-fetched content then reflects the new
//! commit. A "not found" result is a valid `None` outcome and is *not*
//! cached, so a file created after a miss is discovered on the next call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::connection::Connection;
use super::GitHubError;

type RepositoryCache = HashMap<String, Vec<u8>>;

/// Memoizes raw file content keyed by `owner/name` + path.
pub struct DownloadCache {
    connection: Arc<Connection>,
    entries: Mutex<HashMap<String, RepositoryCache>>,
}

impl DownloadCache {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached content, `None` when the key was never fetched successfully.
    pub async fn get(&self, repository_address: &str, path: &str) -> Option<Vec<u8>> {
        let normalized = normalize_path(path);
        self.entries
            .lock()
            .await
            .get(repository_address)
            .and_then(|cache| cache.get(&normalized))
            .cloned()
    }

    /// Download a file from a repository, serving repeats from the cache.
    ///
    /// Returns `Ok(None)` when the file does not exist remotely or the
    /// connection could not be established this cycle.
    pub async fn download(
        &self,
        owner: &str,
        name: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, GitHubError> {
        let normalized = normalize_path(path);
        let address = format!("{owner}/{name}");

        if let Some(content) = self.get(&address, &normalized).await {
            debug!(%address, path = %normalized, "already downloaded");
            return Ok(Some(content));
        }

        if !self.connection.connect().await? {
            return Ok(None);
        }

        debug!(%address, path = %normalized, "downloading");
        let content = self.connection.api().raw_content(owner, name, &normalized).await?;

        if let Some(content) = &content {
            self.entries
                .lock()
                .await
                .entry(address)
                .or_default()
                .entry(normalized)
                .or_insert_with(|| content.clone());
        }

        Ok(content)
    }

    /// Drop every cached entry. Invoked only when activity is detected.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_normalize_to_forward_slashes() {
        assert_eq!(normalize_path(r"Test\Foo\Foo.csproj"), "Test/Foo/Foo.csproj");
        assert_eq!(normalize_path("/README.md"), "/README.md");
    }
}
