//! Segment provider capability and the configuration-backed provider.

use async_trait::async_trait;
use campaign_core::config::ProviderConfig;
use campaign_core::types::SegmentInfo;
use std::collections::{BTreeMap, HashSet};

/// External system supplying segment listings and membership.
///
/// Each call is independently callable and independently failable; the
/// aggregator bounds every call with its own timeout.
#[async_trait]
pub trait SegmentProvider: Send + Sync {
    /// Key under which campaigns reference this provider.
    fn provider(&self) -> &str;

    /// Segments this provider offers.
    async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>>;

    /// Member identifiers of one segment.
    async fn users(&self, code: &str) -> anyhow::Result<Vec<String>>;

    /// Whether membership should be cached instead of queried live.
    fn cache_enabled(&self) -> bool;
}

/// Provider whose segments are declared in configuration.
pub struct StaticSegmentProvider {
    key: String,
    segments: BTreeMap<String, HashSet<String>>,
    cache_enabled: bool,
}

impl StaticSegmentProvider {
    pub fn new(key: impl Into<String>, cache_enabled: bool) -> Self {
        Self {
            key: key.into(),
            segments: BTreeMap::new(),
            cache_enabled,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut provider = Self::new(config.key.clone(), config.cache_enabled());
        for (code, members) in &config.segments {
            provider = provider.with_segment(code, members.iter().map(String::as_str));
        }
        provider
    }

    pub fn with_segment<'a>(mut self, code: &str, members: impl IntoIterator<Item = &'a str>) -> Self {
        self.segments.insert(
            code.to_string(),
            members.into_iter().map(str::to_string).collect(),
        );
        self
    }
}

#[async_trait]
impl SegmentProvider for StaticSegmentProvider {
    fn provider(&self) -> &str {
        &self.key
    }

    async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>> {
        Ok(self
            .segments
            .keys()
            .map(|code| SegmentInfo {
                code: code.clone(),
                name: code.clone(),
                provider: self.key.clone(),
            })
            .collect())
    }

    async fn users(&self, code: &str) -> anyhow::Result<Vec<String>> {
        self.segments
            .get(code)
            .map(|members| members.iter().cloned().collect())
            .ok_or_else(|| anyhow::anyhow!("segment '{code}' is not defined"))
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}
