//! Connection state and the rate-limit slow-down cycle.
//!
//! The connection guards the shared API quota from the crawler and the
//! activity poller: once the remaining-capacity ratio drops below the
//! threshold it disconnects, waits out a fixed slow-down period, then
//! reconnects. The 0.8 threshold leaves headroom for burst search calls,
//! which are more quota-expensive than content reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::api::GitHubApi;
use super::GitHubError;

/// Remaining-capacity ratio below which the connection slows down.
pub const REMAINING_REQUESTS_THRESHOLD: f64 = 0.8;

/// Fixed wait before reconnecting once the quota runs low.
pub const SLOWDOWN_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct ConnectionState {
    connected: bool,
    remaining_ratio: f64,
    slowing_down: bool,
}

/// Owns the API session lifecycle: construct, connect, slow down, reconnect.
pub struct Connection {
    api: Arc<dyn GitHubApi>,
    owner: String,
    slowdown: Duration,
    state: RwLock<ConnectionState>,
}

impl Connection {
    pub fn new(api: Arc<dyn GitHubApi>, owner: impl Into<String>) -> Self {
        Self::with_slowdown(api, owner, SLOWDOWN_TIME)
    }

    /// Tests shorten the slow-down wait.
    pub fn with_slowdown(api: Arc<dyn GitHubApi>, owner: impl Into<String>, slowdown: Duration) -> Self {
        Self {
            api,
            owner: owner.into(),
            slowdown,
            state: RwLock::new(ConnectionState::default()),
        }
    }

    pub fn api(&self) -> &Arc<dyn GitHubApi> {
        &self.api
    }

    /// Ensure the session is usable, slowing down first if the quota is low.
    ///
    /// Returns `Ok(false)` when the credential was rejected (recoverable —
    /// retry on a later cycle). Any other API failure is fatal and
    /// propagated.
    pub async fn connect(&self) -> Result<bool, GitHubError> {
        if self.is_connected().await {
            let ratio = self.fetch_remaining_ratio().await;
            self.state.write().await.remaining_ratio = ratio;

            if ratio >= REMAINING_REQUESTS_THRESHOLD {
                return Ok(true);
            }

            debug!(ratio, "quota below threshold, slowing down");
            self.disconnect().await;
            self.slow_down().await;
        }

        self.reconnect().await?;
        Ok(self.is_connected().await)
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub async fn remaining_ratio(&self) -> f64 {
        self.state.read().await.remaining_ratio
    }

    pub async fn is_slowing_down(&self) -> bool {
        self.state.read().await.slowing_down
    }

    async fn disconnect(&self) {
        self.state.write().await.connected = false;
    }

    async fn reconnect(&self) -> Result<(), GitHubError> {
        match self.api.user(&self.owner).await {
            Ok(user) => {
                debug!(login = %user.login, "connected");
                self.state.write().await.connected = true;
                Ok(())
            }
            Err(GitHubError::Unauthorized(message)) => {
                warn!(%message, "failed to connect");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Current quota ratio; a failed rate-limit query counts as exhausted so
    /// the next cycle slows down instead of erroring out.
    async fn fetch_remaining_ratio(&self) -> f64 {
        match self.api.rate_limits().await {
            Ok(limits) => limits.remaining_ratio(),
            Err(error) => {
                warn!(%error, "rate limit query failed");
                0.0
            }
        }
    }

    async fn slow_down(&self) {
        self.state.write().await.slowing_down = true;
        tokio::time::sleep(self.slowdown).await;
        self.state.write().await.slowing_down = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::api::{CodeSearchItem, Quota, RateLimits, RemoteBranch, RemoteRepository, RemoteUser};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock that reports a fixed quota ratio and counts user lookups.
    struct FixedRatioApi {
        remaining: u64,
        user_calls: AtomicU64,
        authorized: bool,
    }

    impl FixedRatioApi {
        fn new(remaining: u64) -> Self {
            Self {
                remaining,
                user_calls: AtomicU64::new(0),
                authorized: true,
            }
        }
    }

    #[async_trait]
    impl GitHubApi for FixedRatioApi {
        async fn user(&self, login: &str) -> Result<RemoteUser, GitHubError> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            if self.authorized {
                Ok(RemoteUser { login: login.to_string() })
            } else {
                Err(GitHubError::Unauthorized("bad credentials".into()))
            }
        }

        async fn rate_limits(&self) -> Result<RateLimits, GitHubError> {
            Ok(RateLimits {
                core: Quota { remaining: self.remaining, limit: 100 },
                search: Quota { remaining: self.remaining, limit: 100 },
            })
        }

        async fn search_repositories(
            &self,
            _: &str,
            _: Option<DateTime<Utc>>,
        ) -> Result<Vec<RemoteRepository>, GitHubError> {
            Ok(Vec::new())
        }

        async fn search_code(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Vec<CodeSearchItem>, GitHubError> {
            Ok(Vec::new())
        }

        async fn list_branches(&self, _: &str, _: &str) -> Result<Vec<RemoteBranch>, GitHubError> {
            Ok(Vec::new())
        }

        async fn raw_content(&self, _: &str, _: &str, _: &str) -> Result<Option<Vec<u8>>, GitHubError> {
            Ok(None)
        }
    }

    fn fast_connection(api: FixedRatioApi) -> Connection {
        Connection::with_slowdown(Arc::new(api), "acme", Duration::from_millis(5))
    }

    #[tokio::test]
    async fn first_connect_authenticates() {
        let connection = fast_connection(FixedRatioApi::new(100));
        assert!(!connection.is_connected().await);
        assert!(connection.connect().await.unwrap());
        assert!(connection.is_connected().await);
    }

    #[tokio::test]
    async fn ratio_above_threshold_succeeds_without_reconnect() {
        let api = Arc::new(FixedRatioApi::new(81));
        let connection =
            Connection::with_slowdown(Arc::clone(&api) as Arc<dyn GitHubApi>, "acme", Duration::from_millis(5));

        assert!(connection.connect().await.unwrap());
        let calls_after_first = api.user_calls.load(Ordering::SeqCst);

        // Ratio 0.81 — no disconnect, no second authentication.
        assert!(connection.connect().await.unwrap());
        assert_eq!(api.user_calls.load(Ordering::SeqCst), calls_after_first);
        assert!((connection.remaining_ratio().await - 0.81).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ratio_below_threshold_slows_down_then_reconnects() {
        let api = Arc::new(FixedRatioApi::new(79));
        let connection =
            Connection::with_slowdown(Arc::clone(&api) as Arc<dyn GitHubApi>, "acme", Duration::from_millis(5));

        assert!(connection.connect().await.unwrap());
        let calls_after_first = api.user_calls.load(Ordering::SeqCst);

        // Ratio 0.79 — disconnect + slow down + fresh authentication.
        assert!(connection.connect().await.unwrap());
        assert_eq!(api.user_calls.load(Ordering::SeqCst), calls_after_first + 1);
    }

    #[tokio::test]
    async fn rejected_credential_is_recoverable() {
        let mut api = FixedRatioApi::new(100);
        api.authorized = false;
        let connection = fast_connection(api);

        let connected = connection.connect().await.unwrap();
        assert!(!connected);
        assert!(!connection.is_connected().await);
    }
}
