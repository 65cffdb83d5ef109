//! Background activity poller.
//!
//! A fixed-interval timer drives a four-state machine that, independent of
//! the main crawl, detects which repositories have had new pushes since the
//! last check. Each tick is non-blocking: if the in-flight async operation
//! for the current state has not completed, the tick is a no-op and returns
//! immediately. The "last search time" advances at the moment a search is
//! *issued*, not when it completes, so activity occurring during the request
//! round-trip is never missed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::api::{GitHubApi, RateLimits, RemoteRepository};
use super::connection::REMAINING_REQUESTS_THRESHOLD;
use super::GitHubError;

/// Default time between polling ticks.
pub const DEFAULT_POLLING_TIME: Duration = Duration::from_secs(20);

/// States of the activity polling machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Initialization — behaves like `GetRemainingRequests`.
    Init,
    /// Issue the rate-limit query.
    GetRemainingRequests,
    /// Rate-limit query in flight; on completion decide whether to search.
    Reconnect,
    /// Activity search in flight; on completion emit changed repository ids.
    EnumerateRepositories,
}

/// Typed change record delivered to subscribers.
///
/// An empty `changed` list after a completed query is a normal outcome: no
/// activity since the last search.
#[derive(Debug, Clone)]
pub struct ActivityReport {
    pub changed: Vec<i64>,
}

struct PollerInner {
    state: PollerState,
    last_search_time: DateTime<Utc>,
    rate_limits_task: Option<JoinHandle<Result<RateLimits, GitHubError>>>,
    search_task: Option<JoinHandle<Result<Vec<RemoteRepository>, GitHubError>>>,
    sender: Option<mpsc::UnboundedSender<ActivityReport>>,
    timer: Option<JoinHandle<()>>,
}

/// Periodic repository-activity detector.
///
/// Subscribing starts the timer task; unsubscribing aborts it (future ticks
/// are cancelled, an in-flight request is not). Pausing skips ticks without
/// losing machine state — the validation engine pauses the poller while it
/// rewrites shared state during an activity-driven revalidation cycle.
pub struct ActivityPoller {
    api: Arc<dyn GitHubApi>,
    owner: String,
    interval: Duration,
    paused: AtomicBool,
    /// Repository ids known to the crawl, read wholesale to decide whether
    /// an activity search is worthwhile. The only shared structure needing
    /// a lock of its own; producer and consumer only ever replace-wholesale
    /// or read-wholesale it.
    repositories: std::sync::Mutex<Vec<i64>>,
    inner: Mutex<PollerInner>,
}

impl ActivityPoller {
    pub fn new(api: Arc<dyn GitHubApi>, owner: impl Into<String>, interval: Duration) -> Self {
        Self {
            api,
            owner: owner.into(),
            interval,
            paused: AtomicBool::new(false),
            repositories: std::sync::Mutex::new(Vec::new()),
            inner: Mutex::new(PollerInner {
                state: PollerState::Init,
                last_search_time: DateTime::<Utc>::UNIX_EPOCH,
                rate_limits_task: None,
                search_task: None,
                sender: None,
                timer: None,
            }),
        }
    }

    /// Replace the list of repositories the poller considers. Called by the
    /// crawl after each enumeration pass.
    pub fn set_repositories(&self, ids: Vec<i64>) {
        *self.repositories.lock().expect("repository list lock") = ids;
    }

    /// Start the timer and return the channel carrying activity reports.
    pub async fn subscribe(self: &Arc<Self>) -> mpsc::UnboundedReceiver<ActivityReport> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let poller = Arc::clone(self);
        let interval = self.interval;
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of tokio's interval fires immediately; consume
            // it so polling starts one full interval after subscription.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                poller.tick().await;
            }
        });

        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.timer.take() {
            previous.abort();
        }
        inner.sender = Some(sender);
        inner.timer = Some(timer);
        inner.search_task = None;
        drop(inner);

        receiver
    }

    /// Stop the timer. An in-flight request is not cancelled, but its result
    /// is discarded on the next subscription.
    pub async fn unsubscribe(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.sender = None;
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub async fn state(&self) -> PollerState {
        self.inner.lock().await.state
    }

    /// Advance the state machine by one tick. Never blocks on network
    /// completion: operations still in flight leave the state untouched.
    pub async fn tick(&self) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }

        let mut inner = self.inner.lock().await;
        match inner.state {
            PollerState::Init | PollerState::GetRemainingRequests => {
                let api = Arc::clone(&self.api);
                inner.rate_limits_task = Some(tokio::spawn(async move { api.rate_limits().await }));
                inner.state = PollerState::Reconnect;
            }

            PollerState::Reconnect => {
                let finished = inner
                    .rate_limits_task
                    .as_ref()
                    .is_some_and(|task| task.is_finished());
                if !finished {
                    return;
                }

                let task = inner.rate_limits_task.take().expect("task checked above");
                let ratio = match task.await {
                    Ok(Ok(limits)) => limits.remaining_ratio(),
                    Ok(Err(error)) => {
                        warn!(%error, "rate limit query failed");
                        0.0
                    }
                    Err(join_error) => {
                        warn!(%join_error, "rate limit task panicked");
                        0.0
                    }
                };

                if ratio >= REMAINING_REQUESTS_THRESHOLD && self.schedule_activity_check(&mut inner) {
                    inner.state = PollerState::EnumerateRepositories;
                } else {
                    debug!(ratio, "skipping activity search this cycle");
                    inner.state = PollerState::GetRemainingRequests;
                }
            }

            PollerState::EnumerateRepositories => {
                let finished = inner
                    .search_task
                    .as_ref()
                    .is_some_and(|task| task.is_finished());
                if !finished {
                    return;
                }

                let task = inner.search_task.take().expect("task checked above");
                match task.await {
                    Ok(Ok(repositories)) => {
                        let changed: Vec<i64> = repositories
                            .iter()
                            .filter(|repository| !repository.archived)
                            .map(|repository| repository.id)
                            .collect();
                        debug!(count = changed.len(), "activity search complete");
                        if let Some(sender) = &inner.sender {
                            let _ = sender.send(ActivityReport { changed });
                        }
                    }
                    Ok(Err(error)) => warn!(%error, "activity search failed"),
                    Err(join_error) => warn!(%join_error, "activity search task panicked"),
                }
                inner.state = PollerState::GetRemainingRequests;
            }
        }
    }

    /// Issue the "repositories updated since T" search. Returns `false`
    /// (nothing scheduled) when the crawl has not reported any repositories
    /// yet — searching would spend search quota for nothing.
    fn schedule_activity_check(&self, inner: &mut PollerInner) -> bool {
        debug_assert!(inner.search_task.is_none());

        let known = self.repositories.lock().expect("repository list lock");
        if known.is_empty() {
            return false;
        }
        drop(known);

        let api = Arc::clone(&self.api);
        let owner = self.owner.clone();
        let since = inner.last_search_time;
        inner.search_task =
            Some(tokio::spawn(async move { api.search_repositories(&owner, Some(since)).await }));
        // Advance T when the search is issued, not when it completes.
        inner.last_search_time = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::api::{CodeSearchItem, Quota, RemoteBranch, RemoteUser};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    struct ScriptedApi {
        remaining: u64,
        repositories: Vec<RemoteRepository>,
        search_calls: AtomicU64,
    }

    impl ScriptedApi {
        fn new(remaining: u64, repositories: Vec<RemoteRepository>) -> Self {
            Self {
                remaining,
                repositories,
                search_calls: AtomicU64::new(0),
            }
        }
    }

    fn remote(id: i64, name: &str, archived: bool) -> RemoteRepository {
        RemoteRepository {
            id,
            name: name.to_string(),
            owner: "acme".to_string(),
            private: false,
            archived,
        }
    }

    #[async_trait]
    impl GitHubApi for ScriptedApi {
        async fn user(&self, login: &str) -> Result<RemoteUser, GitHubError> {
            Ok(RemoteUser { login: login.to_string() })
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
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.repositories.clone())
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

    /// Long interval so the timer never fires during a test; ticks are
    /// driven manually.
    const MANUAL: Duration = Duration::from_secs(3600);

    async fn settle() {
        // Give spawned queries a moment to finish before the next tick polls.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn full_cycle_emits_changed_ids_without_archived() {
        let api = ScriptedApi::new(
            100,
            vec![remote(7, "active", false), remote(8, "attic", true)],
        );
        let poller = Arc::new(ActivityPoller::new(Arc::new(api), "acme", MANUAL));
        let mut receiver = poller.subscribe().await;
        poller.set_repositories(vec![7, 8]);

        poller.tick().await; // issue rate-limit query
        assert_eq!(poller.state().await, PollerState::Reconnect);
        settle().await;

        poller.tick().await; // ratio ok — issue search
        assert_eq!(poller.state().await, PollerState::EnumerateRepositories);
        settle().await;

        poller.tick().await; // search complete — emit report
        assert_eq!(poller.state().await, PollerState::GetRemainingRequests);

        let report = receiver.try_recv().expect("report emitted");
        assert_eq!(report.changed, vec![7]);

        poller.unsubscribe().await;
    }

    #[tokio::test]
    async fn low_quota_returns_to_rate_limit_state_without_searching() {
        let api = Arc::new(ScriptedApi::new(79, vec![remote(7, "active", false)]));
        let poller = ActivityPoller::new(Arc::clone(&api) as Arc<dyn GitHubApi>, "acme", MANUAL);
        poller.set_repositories(vec![7]);

        poller.tick().await;
        settle().await;
        poller.tick().await;

        assert_eq!(poller.state().await, PollerState::GetRemainingRequests);
        assert_eq!(api.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_repository_list_skips_the_search() {
        let api = Arc::new(ScriptedApi::new(100, vec![remote(7, "active", false)]));
        let poller = ActivityPoller::new(Arc::clone(&api) as Arc<dyn GitHubApi>, "acme", MANUAL);

        poller.tick().await;
        settle().await;
        poller.tick().await;

        // No known repositories — straight back to the rate-limit state.
        assert_eq!(poller.state().await, PollerState::GetRemainingRequests);
        assert_eq!(api.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn paused_poller_skips_ticks_without_losing_state() {
        let api = ScriptedApi::new(100, Vec::new());
        let poller = ActivityPoller::new(Arc::new(api), "acme", MANUAL);

        poller.pause();
        poller.tick().await;
        assert_eq!(poller.state().await, PollerState::Init);

        poller.resume();
        poller.tick().await;
        assert_eq!(poller.state().await, PollerState::Reconnect);
    }

    #[tokio::test]
    async fn empty_report_is_emitted_after_a_quiet_search() {
        let api = ScriptedApi::new(100, Vec::new());
        let poller = Arc::new(ActivityPoller::new(Arc::new(api), "acme", MANUAL));
        let mut receiver = poller.subscribe().await;
        poller.set_repositories(vec![1]);

        poller.tick().await;
        settle().await;
        poller.tick().await;
        settle().await;
        poller.tick().await;

        let report = receiver.try_recv().expect("report emitted");
        assert!(report.changed.is_empty());

        poller.unsubscribe().await;
    }
}
