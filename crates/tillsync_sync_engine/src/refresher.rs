//! Periodic pull of reference data into the local cache.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{Query, RemoteStore};
use crate::state::{StatePublisher, SyncStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tillsync_codec::Record;
use tillsync_core::CacheStore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of one refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Every collection was fetched and written.
    Refreshed {
        /// Records written across all collections.
        records: usize,
    },
    /// Skipped because the device is offline.
    SkippedOffline,
    /// Skipped because no scope was given.
    SkippedEmptyScope,
    /// Skipped because the scope was refreshed recently.
    SkippedRateLimited,
    /// A fetch or local write failed; the cache was left as it was.
    Failed(String),
}

impl RefreshOutcome {
    /// Whether the cache was updated.
    pub fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed { .. })
    }
}

/// Pulls scoped reference collections from the remote store.
///
/// Owns all writes to the cache partition. Successful refreshes are rate
/// limited per scope by an in-memory monotonic timestamp that a failed
/// refresh leaves untouched.
pub(crate) struct CacheRefresher {
    remote: Arc<dyn RemoteStore>,
    cache: CacheStore,
    state: Arc<StatePublisher>,
    stats: Arc<RwLock<SyncStats>>,
    config: Arc<SyncConfig>,
    last_success: RwLock<HashMap<String, Instant>>,
    active_scope: RwLock<Option<String>>,
    /// Serializes refreshes so overlapping triggers see each other's timestamp.
    running: tokio::sync::Mutex<()>,
}

impl CacheRefresher {
    pub(crate) fn new(
        remote: Arc<dyn RemoteStore>,
        cache: CacheStore,
        state: Arc<StatePublisher>,
        stats: Arc<RwLock<SyncStats>>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            remote,
            cache,
            state,
            stats,
            config,
            last_success: RwLock::new(HashMap::new()),
            active_scope: RwLock::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Refreshes every configured collection for `scope`.
    pub(crate) async fn refresh(&self, scope: &str) -> RefreshOutcome {
        if scope.trim().is_empty() {
            return RefreshOutcome::SkippedEmptyScope;
        }

        let _running = self.running.lock().await;

        if !self.state.current().online {
            debug!(scope, "refresh skipped: offline");
            return RefreshOutcome::SkippedOffline;
        }
        if let Some(last) = self.last_success.read().get(scope) {
            if last.elapsed() < self.config.refresh_interval {
                debug!(scope, "refresh skipped: rate limited");
                return RefreshOutcome::SkippedRateLimited;
            }
        }

        // Stamped at the start so fetch latency does not push the next tick
        // inside the interval.
        let started = Instant::now();
        match self.fetch_and_store(scope).await {
            Ok(records) => {
                self.last_success.write().insert(scope.to_string(), started);
                self.stats.write().refreshes_completed += 1;
                info!(scope, records, "cache refreshed");
                RefreshOutcome::Refreshed { records }
            }
            Err(e) => {
                warn!(scope, error = %e, "cache refresh failed");
                let mut stats = self.stats.write();
                stats.refreshes_failed += 1;
                stats.last_error = Some(e.to_string());
                RefreshOutcome::Failed(e.to_string())
            }
        }
    }

    /// Fetches every collection first so a failed fetch writes nothing.
    async fn fetch_and_store(&self, scope: &str) -> SyncResult<usize> {
        let key_field = self.cache_key_field();
        let mut fetched: Vec<(&str, Vec<Record>)> = Vec::new();

        for collection in &self.config.refresh_collections {
            let query = Query::new()
                .eq(self.config.scope_field.as_str(), scope)
                .order_by(key_field.as_str(), true)
                .limit(self.config.refresh_limit);
            let rows = tokio::time::timeout(
                self.config.dispatch_timeout,
                self.remote.select(collection, &query),
            )
            .await
            .map_err(|_| SyncError::Timeout)??;
            fetched.push((collection.as_str(), rows));
        }

        let mut written = 0;
        for (collection, rows) in fetched {
            written += self.cache.upsert_all(collection, rows)?;
        }
        Ok(written)
    }

    fn cache_key_field(&self) -> String {
        self.cache.store().config().key_field.clone()
    }

    /// Refreshes the active scope, if there is one.
    pub(crate) async fn refresh_active(&self) -> Option<RefreshOutcome> {
        let scope = self.active_scope.read().clone()?;
        Some(self.refresh(&scope).await)
    }

    pub(crate) fn set_active_scope(&self, scope: Option<String>) {
        *self.active_scope.write() = scope;
    }

    pub(crate) fn active_scope(&self) -> Option<String> {
        self.active_scope.read().clone()
    }
}

/// Refreshes `scope` immediately, then on every tick until aborted.
pub(crate) fn spawn_schedule(refresher: Arc<CacheRefresher>, scope: String) -> JoinHandle<()> {
    let period = refresher.config.refresh_tick;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = refresher.refresh(&scope).await;
            debug!(scope = scope.as_str(), ?outcome, "scheduled refresh");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CallKind, MemoryRemote};
    use crate::state::ConnectivityState;
    use std::time::Duration;
    use tillsync_codec::record;
    use tillsync_core::LocalStore;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        cache: CacheStore,
        state: Arc<StatePublisher>,
        refresher: Arc<CacheRefresher>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed(
            "products",
            [
                record! { "id" => "P1", "business_id" => "B1", "name" => "Tea" },
                record! { "id" => "P2", "business_id" => "B2", "name" => "Milk" },
            ],
        );
        remote.seed(
            "stock",
            [record! { "id" => "S1", "business_id" => "B1", "quantity" => 3 }],
        );

        let cache = CacheStore::new(Arc::new(LocalStore::open_in_memory().unwrap()));
        let state = Arc::new(StatePublisher::new(ConnectivityState {
            online: true,
            ..ConnectivityState::default()
        }));
        let refresher = Arc::new(CacheRefresher::new(
            remote.clone(),
            cache.clone(),
            state.clone(),
            Arc::new(RwLock::new(SyncStats::default())),
            Arc::new(SyncConfig::default()),
        ));
        Fixture {
            remote,
            cache,
            state,
            refresher,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_pulls_scoped_rows() {
        let f = fixture();
        let outcome = f.refresher.refresh("B1").await;
        assert_eq!(outcome, RefreshOutcome::Refreshed { records: 2 });
        assert_eq!(f.cache.len("products"), 1);
        assert_eq!(f.cache.len("stock"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_refresh_within_interval_is_skipped() {
        let f = fixture();
        assert!(f.refresher.refresh("B1").await.is_refreshed());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(
            f.refresher.refresh("B1").await,
            RefreshOutcome::SkippedRateLimited
        );
        assert_eq!(f.remote.calls(CallKind::Select).len(), 2);

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        assert!(f.refresher.refresh("B1").await.is_refreshed());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_cache_and_timestamp() {
        let f = fixture();
        f.remote.fail_collection("stock");

        let outcome = f.refresher.refresh("B1").await;
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        // products was fetched but nothing was written
        assert!(f.cache.collections().is_empty());

        f.remote.clear_failures();
        assert!(f.refresher.refresh("B1").await.is_refreshed());
    }

    #[tokio::test]
    async fn preconditions_are_silent_noops() {
        let f = fixture();
        assert_eq!(f.refresher.refresh("").await, RefreshOutcome::SkippedEmptyScope);

        f.state.set_online(false);
        assert_eq!(f.refresher.refresh("B1").await, RefreshOutcome::SkippedOffline);
        assert!(f.remote.journal().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_refreshes_on_each_tick() {
        let f = fixture();
        let handle = spawn_schedule(f.refresher.clone(), "B1".to_string());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.remote.calls(CallKind::Select).len(), 2);

        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert_eq!(f.remote.calls(CallKind::Select).len(), 4);

        handle.abort();
        tokio::time::sleep(Duration::from_secs(60 * 60)).await;
        assert_eq!(f.remote.calls(CallKind::Select).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_still_refreshes_every_tick() {
        let f = fixture();
        f.remote.set_latency(Duration::from_secs(1));
        let handle = spawn_schedule(f.refresher.clone(), "B1".to_string());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.remote.calls(CallKind::Select).len(), 2);

        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert_eq!(f.remote.calls(CallKind::Select).len(), 4);

        tokio::time::sleep(Duration::from_secs(15 * 60)).await;
        assert_eq!(f.remote.calls(CallKind::Select).len(), 6);
        handle.abort();
    }
}
