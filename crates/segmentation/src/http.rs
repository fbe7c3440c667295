//! JSON-over-HTTP segment provider.
//!
//! Expects `GET {base}/segments` to return `[{"code": .., "name": ..}]` and
//! `GET {base}/segments/{code}/users` to return `{"users": [..]}`.

use crate::provider::SegmentProvider;
use async_trait::async_trait;
use campaign_core::types::SegmentInfo;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SegmentItem {
    code: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<String>,
}

pub struct HttpSegmentProvider {
    key: String,
    base_url: Url,
    cache_enabled: bool,
    client: Client,
}

impl HttpSegmentProvider {
    pub fn new(
        key: impl Into<String>,
        base_url: impl Into<String>,
        cache_enabled: bool,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let key = key.into();
        let base_url: Url = base_url.into().parse()?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("segment provider '{key}' base_url {base_url} cannot hold a path");
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            key,
            base_url,
            cache_enabled,
            client,
        })
    }

    /// Base URL extended with `segments`, each escaped as a single path
    /// segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> anyhow::Result<T> {
        let url = self.endpoint(segments);
        debug!(provider = %self.key, url = %url, "Querying segment provider");

        let response = self.client.get(url).send().await?;
        response.error_for_status_ref()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SegmentProvider for HttpSegmentProvider {
    fn provider(&self) -> &str {
        &self.key
    }

    async fn list(&self) -> anyhow::Result<Vec<SegmentInfo>> {
        let items: Vec<SegmentItem> = self.get(&["segments"]).await?;
        Ok(items
            .into_iter()
            .map(|item| SegmentInfo {
                code: item.code,
                name: item.name,
                provider: self.key.clone(),
            })
            .collect())
    }

    async fn users(&self, code: &str) -> anyhow::Result<Vec<String>> {
        let response: UsersResponse = self.get(&["segments", code, "users"]).await?;
        Ok(response.users)
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}
