//! Segment membership cache.
//!
//! Member sets are stored under `provider|code` in a shared [`SegmentStore`]
//! and expire after the configured TTL (24h by default). Reads never call a
//! provider: a missing entry is reported as [`Membership::Miss`] and the caller
//! decides whether to refresh inline or in the background. Until a refresh
//! completes, serving treats a miss as "not a member".

use crate::aggregator::SegmentAggregator;
use campaign_cache::SegmentStore;
use campaign_core::types::SegmentBinding;
use campaign_core::{CampaignError, CampaignResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const DEFAULT_SEGMENT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    /// Nothing cached for the segment; a refresh is needed.
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// An unexpired entry exists and refresh was not forced.
    Fresh,
    /// The provider is queried live, nothing is cached for it.
    CacheDisabled,
    /// Entry replaced with `members` identifiers; 0 leaves no entry.
    Refreshed { members: usize },
}

pub struct SegmentCache {
    store: Arc<dyn SegmentStore>,
    aggregator: Arc<SegmentAggregator>,
    ttl: Duration,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SegmentCache {
    pub fn new(store: Arc<dyn SegmentStore>, aggregator: Arc<SegmentAggregator>) -> Self {
        Self::with_ttl(store, aggregator, DEFAULT_SEGMENT_TTL)
    }

    pub fn with_ttl(
        store: Arc<dyn SegmentStore>,
        aggregator: Arc<SegmentAggregator>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            aggregator,
            ttl,
            refresh_locks: DashMap::new(),
        }
    }

    /// Unique key under which the members of a bound segment are cached.
    pub fn key(binding: &SegmentBinding) -> String {
        format!("{}|{}", binding.provider, binding.code)
    }

    pub fn aggregator(&self) -> &Arc<SegmentAggregator> {
        &self.aggregator
    }

    /// Re-query the provider and replace the cached member set.
    ///
    /// Without `force`, an existing unexpired entry short-circuits. Refreshes
    /// of the same key are serialized, so concurrent misses cause a single
    /// provider call. On provider failure the existing entry is left as is.
    pub async fn refresh(&self, binding: &SegmentBinding, force: bool) -> CampaignResult<RefreshOutcome> {
        let key = Self::key(binding);
        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if !force && self.store.exists(&key).await.map_err(|e| store_error(&key, e))? {
            debug!(key = %key, "Segment already cached");
            return Ok(RefreshOutcome::Fresh);
        }

        if !self.aggregator.cache_enabled(binding) {
            return Ok(RefreshOutcome::CacheDisabled);
        }

        let users = match self.aggregator.users(binding).await {
            Ok(users) => users,
            Err(e) => {
                error!(
                    provider = %binding.provider,
                    code = %binding.code,
                    error = %e,
                    "unable to cache users from segment"
                );
                return Err(e);
            }
        };

        self.store
            .replace(&key, &users, self.ttl)
            .await
            .map_err(|e| store_error(&key, e))?;
        metrics::counter!("segment_cache.refresh").increment(1);
        info!(key = %key, members = users.len(), force, "Segment cache refreshed");

        Ok(RefreshOutcome::Refreshed {
            members: users.len(),
        })
    }

    /// Refresh in a background task, logging instead of returning failures.
    pub fn spawn_refresh(self: &Arc<Self>, binding: SegmentBinding, force: bool) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            // provider and store failures are logged by refresh
            let _ = cache.refresh(&binding, force).await;
        })
    }

    /// Look the identifier up in the cached member set.
    pub async fn is_member(&self, binding: &SegmentBinding, identifier: &str) -> CampaignResult<Membership> {
        let key = Self::key(binding);
        let membership = match self
            .store
            .contains(&key, identifier)
            .await
            .map_err(|e| store_error(&key, e))?
        {
            Some(true) => Membership::Member,
            Some(false) => Membership::NotMember,
            None => Membership::Miss,
        };

        if membership == Membership::Miss {
            metrics::counter!("segment_cache.miss").increment(1);
        } else {
            metrics::counter!("segment_cache.hit").increment(1);
        }
        Ok(membership)
    }

    /// Drop the cached entry so the next non-forced refresh re-queries.
    pub async fn invalidate(&self, binding: &SegmentBinding) -> CampaignResult<()> {
        let key = Self::key(binding);
        self.store
            .remove(&key)
            .await
            .map_err(|e| store_error(&key, e))
    }
}

fn store_error(key: &str, e: anyhow::Error) -> CampaignError {
    error!(key = %key, error = %e, "Segment store unavailable");
    CampaignError::Cache(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SegmentProvider;
    use async_trait::async_trait;
    use campaign_cache::LocalSegmentStore;
    use campaign_cache::SegmentStore;
    use campaign_core::types::SegmentInfo;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Provider whose member list and health can be changed between calls.
    struct ScriptedProvider {
        members: parking_lot::Mutex<Vec<String>>,
        failing: AtomicBool,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(members: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                members: parking_lot::Mutex::new(members.iter().map(|m| m.to_string()).collect()),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(members: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                members: parking_lot::Mutex::new(members.iter().map(|m| m.to_string()).collect()),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
            })
        }

        fn set_members(&self, members: &[&str]) {
            *self.members.lock() = members.iter().map(|m| m.to_string()).collect();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SegmentProvider for ScriptedProvider {
        fn provider(&self) -> &str {
            "crm"
        }
        async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>> {
            Ok(Vec::new())
        }
        async fn users(&self, _code: &str) -> anyhow::Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("crm unavailable");
            }
            Ok(self.members.lock().clone())
        }
        fn cache_enabled(&self) -> bool {
            true
        }
    }

    fn setup(provider: Arc<ScriptedProvider>) -> (Arc<SegmentCache>, LocalSegmentStore) {
        let store = LocalSegmentStore::new();
        let aggregator = SegmentAggregator::new(Duration::from_secs(5)).with_provider(provider);
        let cache = SegmentCache::new(Arc::new(store.clone()), Arc::new(aggregator));
        (Arc::new(cache), store)
    }

    fn vip() -> SegmentBinding {
        SegmentBinding::new(Uuid::new_v4(), "crm", "vip", true)
    }

    #[test]
    fn test_key_format() {
        assert_eq!(SegmentCache::key(&vip()), "crm|vip");
    }

    #[tokio::test]
    async fn test_miss_then_refresh_then_hit() {
        let provider = ScriptedProvider::new(&["u1", "u2"]);
        let (cache, _) = setup(provider.clone());

        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Miss);
        assert_eq!(provider.calls(), 0);

        let outcome = cache.refresh(&vip(), false).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed { members: 2 });
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Member);
        assert_eq!(cache.is_member(&vip(), "u9").await.unwrap(), Membership::NotMember);
    }

    #[tokio::test]
    async fn test_unforced_refresh_is_noop_when_cached() {
        let provider = ScriptedProvider::new(&["u1"]);
        let (cache, _) = setup(provider.clone());

        cache.refresh(&vip(), false).await.unwrap();
        provider.set_members(&["u2"]);
        assert_eq!(cache.refresh(&vip(), false).await.unwrap(), RefreshOutcome::Fresh);
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Member);

        assert_eq!(
            cache.refresh(&vip(), true).await.unwrap(),
            RefreshOutcome::Refreshed { members: 1 }
        );
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::NotMember);
        assert_eq!(cache.is_member(&vip(), "u2").await.unwrap(), Membership::Member);
    }

    #[tokio::test]
    async fn test_empty_result_leaves_no_entry() {
        let provider = ScriptedProvider::new(&["u1"]);
        let (cache, store) = setup(provider.clone());

        cache.refresh(&vip(), false).await.unwrap();
        provider.set_members(&[]);
        assert_eq!(
            cache.refresh(&vip(), true).await.unwrap(),
            RefreshOutcome::Refreshed { members: 0 }
        );
        assert!(store.is_empty());
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Miss);

        // known-empty is not remembered, the next refresh asks again
        cache.refresh(&vip(), false).await.unwrap();
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_stale_entry() {
        let provider = ScriptedProvider::new(&["u1"]);
        let (cache, _) = setup(provider.clone());

        cache.refresh(&vip(), false).await.unwrap();
        provider.failing.store(true, Ordering::SeqCst);

        let err = cache.refresh(&vip(), true).await.unwrap_err();
        assert!(matches!(err, CampaignError::Provider { .. }));
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Member);
    }

    #[tokio::test]
    async fn test_cache_disabled_provider_is_not_cached() {
        let store = LocalSegmentStore::new();
        let local = crate::provider::StaticSegmentProvider::new("local", false)
            .with_segment("all", ["u1"]);
        let aggregator = SegmentAggregator::new(Duration::from_secs(1)).with_provider(Arc::new(local));
        let cache = SegmentCache::new(Arc::new(store.clone()), Arc::new(aggregator));

        let binding = SegmentBinding::new(Uuid::new_v4(), "local", "all", true);
        assert_eq!(cache.refresh(&binding, true).await.unwrap(), RefreshOutcome::CacheDisabled);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_misses_query_provider_once() {
        let provider = ScriptedProvider::slow(&["u1"]);
        let (cache, _) = setup(provider.clone());

        let handles: Vec<_> = (0..8).map(|_| cache.spawn_refresh(vip(), false)).collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Member);
    }

    /// Store that fails every call, as Redis does while unreachable.
    struct DownStore;

    #[async_trait]
    impl SegmentStore for DownStore {
        async fn exists(&self, _key: &str) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }
        async fn contains(&self, _key: &str, _member: &str) -> anyhow::Result<Option<bool>> {
            anyhow::bail!("connection refused")
        }
        async fn replace(&self, _key: &str, _members: &HashSet<String>, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn remove(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let provider = ScriptedProvider::new(&["u1"]);
        let aggregator = SegmentAggregator::new(Duration::from_secs(5)).with_provider(provider.clone());
        let cache = Arc::new(SegmentCache::new(Arc::new(DownStore), Arc::new(aggregator)));

        let err = cache.refresh(&vip(), false).await.unwrap_err();
        assert!(matches!(err, CampaignError::Cache(_)));
        assert_eq!(provider.calls(), 0);

        // forced refresh reaches the provider, then fails on write
        let err = cache.refresh(&vip(), true).await.unwrap_err();
        assert!(matches!(err, CampaignError::Cache(_)));
        assert_eq!(provider.calls(), 1);

        assert!(matches!(
            cache.is_member(&vip(), "u1").await,
            Err(CampaignError::Cache(_))
        ));
        cache.spawn_refresh(vip(), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed_again() {
        let provider = ScriptedProvider::new(&["u1"]);
        let aggregator = SegmentAggregator::new(Duration::from_secs(5)).with_provider(provider.clone());
        let cache = SegmentCache::with_ttl(
            Arc::new(LocalSegmentStore::new()),
            Arc::new(aggregator),
            Duration::from_millis(50),
        );

        cache.refresh(&vip(), false).await.unwrap();
        assert_eq!(cache.refresh(&vip(), false).await.unwrap(), RefreshOutcome::Fresh);
        assert_eq!(provider.calls(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Miss);

        provider.set_members(&["u2"]);
        assert_eq!(
            cache.refresh(&vip(), false).await.unwrap(),
            RefreshOutcome::Refreshed { members: 1 }
        );
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.is_member(&vip(), "u2").await.unwrap(), Membership::Member);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let provider = ScriptedProvider::new(&["u1"]);
        let (cache, _) = setup(provider);
        cache.refresh(&vip(), false).await.unwrap();
        cache.invalidate(&vip()).await.unwrap();
        assert_eq!(cache.is_member(&vip(), "u1").await.unwrap(), Membership::Miss);
    }
}
