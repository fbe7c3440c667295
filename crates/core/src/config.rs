use crate::error::{CampaignError, CampaignResult};
use serde::Deserialize;
use std::collections::HashMap;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CAMPAIGN_ENGINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub segments: SegmentsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// JSON file with campaigns to load at startup.
    #[serde(default)]
    pub campaigns_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    /// Lifetime of a cached segment member set.
    #[serde(default = "default_segment_ttl_secs")]
    pub segment_ttl_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentsConfig {
    /// Upper bound for a single provider call.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// How often cached segments of all campaigns are re-validated.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Static,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub key: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Defaults to `false` for static providers and `true` for HTTP ones.
    #[serde(default)]
    pub cache_enabled: Option<bool>,
    /// Static providers only: segment code -> member identifiers.
    #[serde(default)]
    pub segments: HashMap<String, Vec<String>>,
}

impl ProviderConfig {
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
            .unwrap_or(self.kind == ProviderKind::Http)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_segment_ttl_secs() -> u64 {
    60 * 60 * 24
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_provider_timeout_ms() -> u64 {
    3000
}
fn default_refresh_interval_secs() -> u64 {
    600
}
fn default_tick_interval_secs() -> u64 {
    30
}
fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            segment_ttl_secs: default_segment_ttl_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
            providers: Vec::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            redis: RedisConfig::default(),
            segments: SegmentsConfig::default(),
            scheduler: SchedulerConfig::default(),
            metrics: MetricsConfig::default(),
            campaigns_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file overlaid with
    /// environment variables.
    pub fn load(path: Option<&str>) -> CampaignResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_ENGINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("redis.urls"),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CampaignError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the background loops and the segment store cannot run
    /// with.
    pub fn validate(&self) -> CampaignResult<()> {
        let durations = [
            ("redis.segment_ttl_secs", self.redis.segment_ttl_secs),
            ("segments.provider_timeout_ms", self.segments.provider_timeout_ms),
            ("segments.refresh_interval_secs", self.segments.refresh_interval_secs),
            ("scheduler.tick_interval_secs", self.scheduler.tick_interval_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(CampaignError::Config(format!("{name} must be greater than 0")));
        }
        Ok(())
    }
}
