//! Serve-time segment gate: decides whether a visitor passes every segment
//! binding of a campaign.

use crate::cache::{Membership, SegmentCache};
use campaign_core::types::SegmentBinding;
use campaign_core::CampaignResult;
use std::sync::Arc;
use tracing::debug;

pub struct SegmentGate {
    cache: Arc<SegmentCache>,
}

impl SegmentGate {
    pub fn new(cache: Arc<SegmentCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    /// True when the visitor is a member of every inclusive segment and of
    /// no exclusive one. Visitors without an identifier are members of
    /// nothing.
    ///
    /// Cached providers are answered from the cache only. A cache miss
    /// schedules a background refresh and counts as "not a member" for this
    /// request. Providers with caching disabled are asked live.
    pub async fn allows(&self, bindings: &[SegmentBinding], identifier: Option<&str>) -> CampaignResult<bool> {
        for binding in bindings {
            let member = match identifier {
                Some(identifier) => self.is_member(binding, identifier).await?,
                None => false,
            };
            if member != binding.inclusive {
                debug!(
                    provider = %binding.provider,
                    code = %binding.code,
                    inclusive = binding.inclusive,
                    "Segment gate rejected visitor"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn is_member(&self, binding: &SegmentBinding, identifier: &str) -> CampaignResult<bool> {
        let aggregator = self.cache.aggregator();
        if !aggregator.cache_enabled(binding) {
            return Ok(aggregator.users(binding).await?.contains(identifier));
        }

        match self.cache.is_member(binding, identifier).await? {
            Membership::Member => Ok(true),
            Membership::NotMember => Ok(false),
            Membership::Miss => {
                self.cache.spawn_refresh(binding.clone(), false);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SegmentAggregator;
    use crate::provider::StaticSegmentProvider;
    use campaign_cache::LocalSegmentStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn gate() -> SegmentGate {
        let aggregator = SegmentAggregator::new(Duration::from_secs(1))
            .with_provider(Arc::new(
                StaticSegmentProvider::new("crm", true).with_segment("vip", ["u1"]),
            ))
            .with_provider(Arc::new(
                StaticSegmentProvider::new("local", false).with_segment("staff", ["u2"]),
            ));
        let cache = SegmentCache::new(Arc::new(LocalSegmentStore::new()), Arc::new(aggregator));
        SegmentGate::new(Arc::new(cache))
    }

    fn binding(provider: &str, code: &str, inclusive: bool) -> SegmentBinding {
        SegmentBinding::new(Uuid::new_v4(), provider, code, inclusive)
    }

    #[tokio::test]
    async fn test_no_bindings_allow_everyone() {
        assert!(gate().allows(&[], None).await.unwrap());
    }

    #[tokio::test]
    async fn test_miss_counts_as_non_member_until_refreshed() {
        let gate = gate();
        let vip = [binding("crm", "vip", true)];

        assert!(!gate.allows(&vip, Some("u1")).await.unwrap());

        gate.cache().refresh(&vip[0], false).await.unwrap();
        assert!(gate.allows(&vip, Some("u1")).await.unwrap());
        assert!(!gate.allows(&vip, Some("u3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exclusive_binding() {
        let gate = gate();
        let not_vip = [binding("crm", "vip", false)];
        gate.cache().refresh(&not_vip[0], false).await.unwrap();

        assert!(!gate.allows(&not_vip, Some("u1")).await.unwrap());
        assert!(gate.allows(&not_vip, Some("u3")).await.unwrap());
        assert!(gate.allows(&not_vip, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_uncached_provider_is_queried_live() {
        let gate = gate();
        let staff = [binding("local", "staff", true)];
        assert!(gate.allows(&staff, Some("u2")).await.unwrap());
        assert!(!gate.allows(&staff, Some("u1")).await.unwrap());
        assert!(!gate.allows(&staff, None).await.unwrap());
    }
}
