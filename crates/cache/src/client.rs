//! Redis-backed segment store. Each segment is a Redis set under
//! `provider|code` with an expiry.

use crate::store::SegmentStore;
use async_trait::async_trait;
use campaign_core::config::RedisConfig;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Shared Redis set store. Cloning the connection manager is cheap and each
/// call works on its own handle.
pub struct RedisSegmentStore {
    conn: ConnectionManager,
}

impl RedisSegmentStore {
    /// Connect to the first configured Redis node.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let mut conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to Redis at {url}"))??;

        // Verify connectivity
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self { conn })
    }
}

#[async_trait]
impl SegmentStore for RedisSegmentStore {
    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn contains(&self, key: &str, member: &str) -> anyhow::Result<Option<bool>> {
        let mut conn = self.conn.clone();
        // SISMEMBER cannot tell a missing key from a non-member
        let (exists, member): (bool, bool) = redis::pipe()
            .exists(key)
            .sismember(key, member)
            .query_async(&mut conn)
            .await?;
        Ok(exists.then_some(member))
    }

    async fn replace(&self, key: &str, members: &HashSet<String>, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !members.is_empty() {
            let members: Vec<&String> = members.iter().collect();
            pipe.sadd(key, members)
                .ignore()
                .expire(key, ttl.as_secs() as i64)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        metrics::counter!("segment_store.replace").increment(1);
        debug!(key = key, members = members.len(), "Segment set replaced");
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
