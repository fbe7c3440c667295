//! In-process segment store backed by DashMap for lock-free concurrent access.
//! Used for single-node deployments and tests.

use crate::store::SegmentStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SetEntry {
    members: HashSet<String>,
    expires_at: Instant,
}

impl SetEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Lock-free local set store with per-key expiry.
#[derive(Clone, Default)]
pub struct LocalSegmentStore {
    store: Arc<DashMap<String, SetEntry>>,
}

impl LocalSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let mut evicted = 0;
        self.store.retain(|_, entry| {
            let expired = entry.is_expired();
            evicted += usize::from(expired);
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn live<T>(&self, key: &str, f: impl FnOnce(&SetEntry) -> T) -> Option<T> {
        let entry = self.store.get(key)?;
        if entry.is_expired() {
            drop(entry);
            // a concurrent replace may have stored a fresh set meanwhile
            self.store.remove_if(key, |_, entry| entry.is_expired());
            return None;
        }
        Some(f(&entry))
    }
}

#[async_trait]
impl SegmentStore for LocalSegmentStore {
    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.live(key, |_| ()).is_some())
    }

    async fn contains(&self, key: &str, member: &str) -> anyhow::Result<Option<bool>> {
        Ok(self.live(key, |entry| entry.members.contains(member)))
    }

    async fn replace(&self, key: &str, members: &HashSet<String>, ttl: Duration) -> anyhow::Result<()> {
        self.store.remove(key);
        if !members.is_empty() {
            self.store.insert(
                key.to_string(),
                SetEntry {
                    members: members.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.store.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn members(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_replace_and_lookup() {
        let store = LocalSegmentStore::new();
        assert!(!store.exists("crm|vip").await.unwrap());
        assert_eq!(store.contains("crm|vip", "u1").await.unwrap(), None);

        store
            .replace("crm|vip", &members(&["u1", "u2"]), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.exists("crm|vip").await.unwrap());
        assert_eq!(store.contains("crm|vip", "u1").await.unwrap(), Some(true));
        assert_eq!(store.contains("crm|vip", "u3").await.unwrap(), Some(false));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_replace_leaves_no_entry() {
        let store = LocalSegmentStore::new();
        store
            .replace("crm|vip", &members(&["u1"]), Duration::from_secs(60))
            .await
            .unwrap();
        store
            .replace("crm|vip", &HashSet::new(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!store.exists("crm|vip").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_disappear() {
        let store = LocalSegmentStore::new();
        store
            .replace("crm|vip", &members(&["u1"]), Duration::ZERO)
            .await
            .unwrap();
        assert!(!store.exists("crm|vip").await.unwrap());

        store
            .replace("crm|old", &members(&["u1"]), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.evict_expired(), 1);
    }

    #[tokio::test]
    async fn test_eviction_keeps_live_entries() {
        let store = LocalSegmentStore::new();
        for key in ["crm|a", "crm|b", "crm|c"] {
            store.replace(key, &members(&["u1"]), Duration::ZERO).await.unwrap();
        }
        store
            .replace("crm|live", &members(&["u1"]), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.evict_expired(), 3);
        assert_eq!(store.evict_expired(), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.contains("crm|live", "u1").await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_expired_read_does_not_drop_replacement() {
        let store = LocalSegmentStore::new();
        store
            .replace("crm|vip", &members(&["u1"]), Duration::ZERO)
            .await
            .unwrap();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.contains("crm|vip", "u1").await.unwrap() })
            })
            .collect();
        store
            .replace("crm|vip", &members(&["u2"]), Duration::from_secs(60))
            .await
            .unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(store.contains("crm|vip", "u2").await.unwrap(), Some(true));
    }
}
