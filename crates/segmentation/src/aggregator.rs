//! Uniform access to every configured segment provider.
//!
//! Listing fans out to all providers concurrently with an independent timeout
//! per call. A failing or hung provider is recorded as an error and the other
//! providers' segments are still returned.

use crate::http::HttpSegmentProvider;
use crate::provider::{SegmentProvider, StaticSegmentProvider};
use campaign_core::config::{ProviderKind, SegmentsConfig};
use campaign_core::types::{SegmentBinding, SegmentInfo};
use campaign_core::{CampaignError, CampaignResult};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of a listing: whatever segments were available plus one error
/// message per provider that failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SegmentListing {
    pub segments: Vec<SegmentInfo>,
    pub errors: Vec<String>,
}

pub struct SegmentAggregator {
    providers: BTreeMap<String, Arc<dyn SegmentProvider>>,
    timeout: Duration,
    last_errors: Mutex<Vec<String>>,
}

impl SegmentAggregator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: BTreeMap::new(),
            timeout,
            last_errors: Mutex::new(Vec::new()),
        }
    }

    /// Resolve every configured provider into its implementation.
    pub fn from_config(config: &SegmentsConfig) -> CampaignResult<Self> {
        let timeout = Duration::from_millis(config.provider_timeout_ms);
        let mut aggregator = Self::new(timeout);
        for provider in &config.providers {
            if aggregator.providers.contains_key(&provider.key) {
                return Err(CampaignError::Config(format!(
                    "segment provider '{}' configured twice",
                    provider.key
                )));
            }
            let implementation: Arc<dyn SegmentProvider> = match provider.kind {
                ProviderKind::Static => Arc::new(StaticSegmentProvider::from_config(provider)),
                ProviderKind::Http => {
                    let base_url = provider.base_url.clone().ok_or_else(|| {
                        CampaignError::Config(format!(
                            "segment provider '{}' requires base_url",
                            provider.key
                        ))
                    })?;
                    Arc::new(HttpSegmentProvider::new(
                        provider.key.clone(),
                        base_url,
                        provider.cache_enabled(),
                        timeout,
                    )?)
                }
            };
            aggregator = aggregator.with_provider(implementation);
        }
        info!(providers = aggregator.providers.len(), "Segment aggregator initialized");
        Ok(aggregator)
    }

    /// Register a provider under its own key, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn SegmentProvider>) -> Self {
        self.providers.insert(provider.provider().to_string(), provider);
        self
    }

    /// List segments of all providers, ordered by provider key.
    pub async fn list(&self) -> SegmentListing {
        let calls = self.providers.iter().map(|(key, provider)| async move {
            let result = match tokio::time::timeout(self.timeout, provider.list()).await {
                Ok(Ok(segments)) => Ok(segments),
                Ok(Err(e)) => Err(CampaignError::provider(key.as_str(), e)),
                Err(_) => Err(CampaignError::provider(
                    key.as_str(),
                    format!("listing timed out after {}ms", self.timeout.as_millis()),
                )),
            };
            (key, result)
        });

        let mut listing = SegmentListing::default();
        for (key, result) in join_all(calls).await {
            match result {
                Ok(segments) => listing.segments.extend(segments),
                Err(e) => {
                    warn!(provider = %key, error = %e, "Unable to list segments");
                    metrics::counter!("segment_provider.error").increment(1);
                    listing.errors.push(e.to_string());
                }
            }
        }

        *self.last_errors.lock() = listing.errors.clone();
        listing
    }

    /// Errors recorded by the most recent `list` call.
    pub fn errors(&self) -> Vec<String> {
        self.last_errors.lock().clone()
    }

    /// Map of segment code to display name over all reachable providers.
    pub async fn segment_names(&self) -> HashMap<String, String> {
        self.list()
            .await
            .segments
            .into_iter()
            .map(|s| (s.code, s.name))
            .collect()
    }

    /// Members of the bound segment, queried from its provider.
    pub async fn users(&self, binding: &SegmentBinding) -> CampaignResult<HashSet<String>> {
        let provider = self.resolve(binding)?;
        match tokio::time::timeout(self.timeout, provider.users(&binding.code)).await {
            Ok(Ok(users)) => Ok(users.into_iter().collect()),
            Ok(Err(e)) => {
                metrics::counter!("segment_provider.error").increment(1);
                Err(CampaignError::provider(binding.provider.as_str(), e))
            }
            Err(_) => {
                metrics::counter!("segment_provider.error").increment(1);
                Err(CampaignError::provider(
                    binding.provider.as_str(),
                    format!(
                        "users of '{}' timed out after {}ms",
                        binding.code,
                        self.timeout.as_millis()
                    ),
                ))
            }
        }
    }

    /// Caching policy of the binding's provider. Unknown providers are never
    /// cached.
    pub fn cache_enabled(&self, binding: &SegmentBinding) -> bool {
        self.providers
            .get(&binding.provider)
            .map_or(false, |p| p.cache_enabled())
    }

    fn resolve(&self, binding: &SegmentBinding) -> CampaignResult<&Arc<dyn SegmentProvider>> {
        self.providers
            .get(&binding.provider)
            .ok_or_else(|| CampaignError::UnknownProvider(binding.provider.clone()))
    }
}
