//! Key-value set store backing the segment membership cache.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

/// Set-valued store with per-key TTL. One store holds many segment keys.
///
/// A key that is absent (never written, expired or removed) means "not yet
/// cached" and is distinct from an empty set, which is never stored.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// True if the key holds an unexpired set.
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// `None` when the key is absent, otherwise whether `member` is in the set.
    async fn contains(&self, key: &str, member: &str) -> anyhow::Result<Option<bool>>;

    /// Delete the key and, when `members` is non-empty, store them with `ttl`.
    async fn replace(&self, key: &str, members: &HashSet<String>, ttl: Duration) -> anyhow::Result<()>;

    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}
